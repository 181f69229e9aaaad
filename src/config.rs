// The configuration surface the core consumes from its caller. Argument parsing itself is out of
// scope for the core; this is the shape the CLI front-end fills in.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Exe,
    Cmd,
    Pid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Kb,
    Mb,
    MebiB,
    Human,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub group_by: GroupBy,
    // May be <= 0: 0 fires tier-2 on any change, a negative value on any change of that
    // magnitude or greater in either direction, a positive value only on growth of at least
    // that magnitude.
    pub min_delta_kb: i64,
    // <= 0 means one-shot (run a single tick and exit).
    pub loop_interval_s: i64,
    pub cmd_len: usize,
    // Percentage (0..=100) of the grand total beyond which groups are folded into OTHERS on tick 1.
    pub top_pct: f64,
    pub units: Units,
    pub pid_filter: Vec<String>,
    pub collapse_other: bool,
    pub show_cpu: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            group_by: GroupBy::Exe,
            min_delta_kb: 0,
            loop_interval_s: 0,
            cmd_len: 64,
            top_pct: 100.0,
            units: Units::Kb,
            pid_filter: vec![],
            collapse_other: false,
            show_cpu: false,
            debug: false,
        }
    }
}
