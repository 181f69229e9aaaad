// ProcessRecord: per-live-PID state carried between ticks.

use crate::config::{Config, GroupBy};
use crate::log;
use crate::maps::Rollup;
use crate::procfsapi::{ProcfsAPI, ReadError};
use crate::types::Pid;
use crate::util::{chunks, strip_nonword};

const KNOWN_INTERPRETERS: &[&str] = &[
    "python", "python2", "python3", "perl", "bash", "sh", "ksh", "zsh", "ruby",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisqualifyReason {
    KernelProcess,
    FilteredByArgs,
    PermissionDenied,
    FileMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Exe(String),
    Cmd(String),
    Pid(Pid),
}

pub struct Identity {
    pub exe_basename: String,
    pub command: String,
}

pub struct ProcessRecord {
    pub pid: Pid,
    pub identity: Option<Identity>,
    pub group_key: Option<GroupKey>,
    pub last_rollup: Option<Rollup>,
    pub cpu_ticks_baseline: Option<u64>,
    pub cpu_pct: f64,
    pub alive: bool,
    pub disqualified: Option<DisqualifyReason>,
}

impl ProcessRecord {
    pub fn new(pid: Pid) -> ProcessRecord {
        ProcessRecord {
            pid,
            identity: None,
            group_key: None,
            last_rollup: None,
            cpu_ticks_baseline: None,
            cpu_pct: 0.0,
            alive: true,
            disqualified: None,
        }
    }

    // Resolves exe/command identity and the group key exactly once per process lifetime; later
    // ticks reuse the cached value, since neither can change for a running PID.
    pub fn ensure_identity(&mut self, fs: &dyn ProcfsAPI, config: &Config) {
        if self.identity.is_some() || self.disqualified.is_some() {
            return;
        }
        match resolve_identity(fs, self.pid, config.cmd_len) {
            Ok(identity) => {
                if !passes_filter(&identity, self.pid, &config.pid_filter) {
                    self.disqualified = Some(DisqualifyReason::FilteredByArgs);
                    return;
                }
                self.group_key = Some(derive_group_key(&identity, self.pid, config.group_by));
                self.identity = Some(identity);
            }
            Err(reason) => self.disqualified = Some(reason),
        }
    }

    // Returns the ticks consumed by this process since the last call, and updates the CPU
    // percentage using the wall-clock tick delta supplied by the caller (from SysFacts). The first
    // observation always reports 0%, since there is no prior sample to diff against.
    pub fn sample_cpu(&mut self, fs: &dyn ProcfsAPI, wall_ticks_now: u64, wall_ticks_prev: Option<u64>) {
        let ticks_now = match read_cpu_ticks(fs, self.pid) {
            Ok(t) => t,
            Err(_) => return,
        };
        if let (Some(prev_ticks), Some(prev_wall)) = (self.cpu_ticks_baseline, wall_ticks_prev) {
            let wall_delta = wall_ticks_now.saturating_sub(prev_wall);
            if wall_delta > 0 {
                self.cpu_pct =
                    (ticks_now.saturating_sub(prev_ticks)) as f64 / wall_delta as f64 * 100.0;
            } else {
                self.cpu_pct = 0.0;
            }
        } else {
            self.cpu_pct = 0.0;
        }
        self.cpu_ticks_baseline = Some(ticks_now);
    }
}

fn resolve_identity(
    fs: &dyn ProcfsAPI,
    pid: Pid,
    cmd_len: usize,
) -> Result<Identity, DisqualifyReason> {
    let raw = read_cmdline(fs, pid)?;
    let args: Vec<&str> = raw.split('\0').filter(|s| !s.is_empty()).collect();
    if args.is_empty() {
        return Err(DisqualifyReason::KernelProcess);
    }

    let first_basename = strip_nonword(basename(args[0]));
    let exe_basename = if KNOWN_INTERPRETERS.contains(&first_basename) && args.len() >= 2 {
        let script_basename = strip_nonword(basename(args[1]));
        format!("{first_basename}->{script_basename}")
    } else {
        first_basename.to_string()
    };

    let mut command = args.join(" ");
    if command.chars().count() > cmd_len {
        command = command.chars().take(cmd_len).collect();
    }

    Ok(Identity {
        exe_basename,
        command,
    })
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn passes_filter(identity: &Identity, pid: Pid, filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    let pid_str = pid.to_string();
    filter
        .iter()
        .any(|f| f == &pid_str || f == &identity.exe_basename)
}

fn derive_group_key(identity: &Identity, pid: Pid, group_by: GroupBy) -> GroupKey {
    match group_by {
        GroupBy::Exe => GroupKey::Exe(identity.exe_basename.clone()),
        GroupBy::Cmd => GroupKey::Cmd(identity.command.clone()),
        GroupBy::Pid => GroupKey::Pid(pid),
    }
}

fn read_cmdline(fs: &dyn ProcfsAPI, pid: Pid) -> Result<String, DisqualifyReason> {
    fs.read_proc_to_string(&format!("{pid}/cmdline"))
        .map_err(map_read_error)
}

fn read_cpu_ticks(fs: &dyn ProcfsAPI, pid: Pid) -> Result<u64, DisqualifyReason> {
    let line = fs
        .read_proc_to_string(&format!("{pid}/stat"))
        .map_err(map_read_error)?;
    // The comm field is parenthesized and may itself contain spaces or parens, so it must be
    // sliced out before splitting the rest of the line on whitespace.
    let commend = line.rfind(')').ok_or(DisqualifyReason::FileMissing)?;
    let (_, rest) = chunks(&line[commend..]);
    // rest[0] is the stray ")"; rest[n] for n>=1 is overall /proc/pid/stat field (n+2). utime is
    // field 14, stime is field 15, so indices 12 and 13 here.
    let utime = rest
        .get(12)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(DisqualifyReason::FileMissing)?;
    let stime = rest
        .get(13)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(DisqualifyReason::FileMissing)?;
    Ok(utime + stime)
}

fn map_read_error(e: ReadError) -> DisqualifyReason {
    match e {
        ReadError::NotFound => DisqualifyReason::FileMissing,
        ReadError::PermissionDenied => DisqualifyReason::PermissionDenied,
        ReadError::Other(msg) => {
            log::error(&format!("unexpected read failure: {msg}"));
            DisqualifyReason::FileMissing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfsapi::MockFS;
    use crate::util::map;

    fn cmdline(args: &[&str]) -> String {
        let mut s = args.join("\0");
        s.push('\0');
        s
    }

    #[test]
    fn test_plain_executable() {
        let files = map! {
            "100/cmdline".to_string() => cmdline(&["/usr/bin/foo", "--flag"])
        };
        let fs = MockFS::new(files, vec![(100, 0)]);
        let id = resolve_identity(&fs, 100, 64).expect("should resolve");
        assert!(id.exe_basename == "foo");
        assert!(id.command == "/usr/bin/foo --flag");
    }

    #[test]
    fn test_kernel_thread_is_disqualified() {
        let files = map! {
            "100/cmdline".to_string() => "".to_string()
        };
        let fs = MockFS::new(files, vec![(100, 0)]);
        assert!(resolve_identity(&fs, 100, 64) == Err(DisqualifyReason::KernelProcess));
    }

    #[test]
    fn test_interpreter_rewrite_with_script_arg() {
        let files = map! {
            "100/cmdline".to_string() => cmdline(&["/usr/bin/python3", "/opt/app/worker.py"])
        };
        let fs = MockFS::new(files, vec![(100, 0)]);
        let id = resolve_identity(&fs, 100, 64).expect("should resolve");
        assert!(id.exe_basename == "python3->worker.py");
    }

    #[test]
    fn test_interpreter_without_script_arg_not_rewritten() {
        let files = map! {
            "100/cmdline".to_string() => cmdline(&["/usr/bin/bash"])
        };
        let fs = MockFS::new(files, vec![(100, 0)]);
        let id = resolve_identity(&fs, 100, 64).expect("should resolve");
        assert!(id.exe_basename == "bash");
    }

    #[test]
    fn test_command_truncation() {
        let files = map! {
            "100/cmdline".to_string() => cmdline(&["/usr/bin/foo", "aaaaaaaaaaaaaaaaaaaaaaaaaaaa"])
        };
        let fs = MockFS::new(files, vec![(100, 0)]);
        let id = resolve_identity(&fs, 100, 10).expect("should resolve");
        assert!(id.command.chars().count() == 10);
    }

    #[test]
    fn test_filter_by_pid() {
        let id = Identity {
            exe_basename: "foo".to_string(),
            command: "foo".to_string(),
        };
        assert!(passes_filter(&id, 100, &["100".to_string()]));
        assert!(!passes_filter(&id, 200, &["100".to_string()]));
    }

    #[test]
    fn test_filter_by_exe_name() {
        let id = Identity {
            exe_basename: "foo".to_string(),
            command: "foo".to_string(),
        };
        assert!(passes_filter(&id, 999, &["foo".to_string()]));
        assert!(!passes_filter(&id, 999, &["bar".to_string()]));
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let id = Identity {
            exe_basename: "foo".to_string(),
            command: "foo".to_string(),
        };
        assert!(passes_filter(&id, 999, &[]));
    }

    #[test]
    fn test_cpu_ticks_first_observation_is_zero_pct() {
        fn stat_with_utime(utime: u64) -> String {
            let mut fields = vec!["0".to_string(); 20];
            fields[11] = utime.to_string();
            format!("100 (foo) {}", fields.join(" "))
        }
        let fs = MockFS::new(
            map! { "100/stat".to_string() => stat_with_utime(500) },
            vec![(100, 0)],
        );
        let mut rec = ProcessRecord::new(100);
        rec.sample_cpu(&fs, 1000, None);
        assert!(rec.cpu_pct == 0.0);
        assert!(rec.cpu_ticks_baseline.is_some());
    }

    #[test]
    fn test_cpu_ticks_second_observation_computes_delta() {
        fn stat_with_utime(utime: u64) -> String {
            let mut fields = vec!["0".to_string(); 20];
            fields[11] = utime.to_string();
            format!("100 (foo) {}", fields.join(" "))
        }
        let fs1 = MockFS::new(
            map! { "100/stat".to_string() => stat_with_utime(100) },
            vec![(100, 0)],
        );
        let mut rec = ProcessRecord::new(100);
        rec.sample_cpu(&fs1, 1000, None);
        assert!(rec.cpu_pct == 0.0);

        let fs2 = MockFS::new(
            map! { "100/stat".to_string() => stat_with_utime(150) },
            vec![(100, 0)],
        );
        rec.sample_cpu(&fs2, 1100, Some(1000));
        // (150-100) / (1100-1000) * 100 = 50%
        assert!(rec.cpu_pct == 50.0);
    }
}
