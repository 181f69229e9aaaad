use memsplit::config::{Config, GroupBy, Units};
use memsplit::format::ReportFormatter;
use memsplit::interrupt;
use memsplit::log;
use memsplit::procfsapi::RealFS;
use memsplit::sampling::SamplingLoop;

use std::io::Write;
use std::thread;
use std::time::Duration;

const USAGE_ERROR: i32 = 2;

// The inter-tick sleep is performed in this many slices so that a pending sleep remains
// interruptible by a signal.
const SLEEP_SLICE_MS: u64 = 200;

fn main() {
    log::init();
    interrupt::handle_interruptions();

    let config = command_line();
    let formatter = ReportFormatter::new(
        config.units,
        config.collapse_other,
        config.show_cpu,
        config.debug,
    );
    let fs = RealFS::new();
    let mut loop_ = SamplingLoop::new(config.clone());

    let mut stdout = std::io::stdout();
    loop {
        match loop_.tick(&fs) {
            Ok(report) => {
                let _ = stdout.write_all(formatter.render(&report).as_bytes());
                let _ = stdout.flush();
            }
            Err(e) => log::error(&format!("Tick failed: {e}")),
        }

        if config.loop_interval_s <= 0 || interrupt::is_interrupted() {
            break;
        }
        sleep_interruptibly(config.loop_interval_s as u64);
        if interrupt::is_interrupted() {
            break;
        }
    }
}

fn sleep_interruptibly(seconds: u64) {
    let mut remaining_ms = seconds * 1000;
    while remaining_ms > 0 && !interrupt::is_interrupted() {
        let slice = remaining_ms.min(SLEEP_SLICE_MS);
        thread::sleep(Duration::from_millis(slice));
        remaining_ms -= slice;
    }
}

// For the sake of simplicity:
//  - allow repeated options to overwrite earlier values
//  - all error reporting is via a generic "usage" message, without specificity as to what was wrong

fn command_line() -> Config {
    let args = std::env::args().collect::<Vec<String>>();
    let mut next = 1;
    let mut config = Config::default();

    while next < args.len() {
        let arg = args[next].as_ref();
        next += 1;
        if let Some((new_next, value)) = string_arg(arg, &args, next, "--group-by") {
            next = new_next;
            config.group_by = match value.as_str() {
                "exe" => GroupBy::Exe,
                "cmd" => GroupBy::Cmd,
                "pid" => GroupBy::Pid,
                _ => usage(true),
            };
        } else if let Some((new_next, value)) = numeric_arg::<i64>(arg, &args, next, "--min-delta-kb") {
            (next, config.min_delta_kb) = (new_next, value);
        } else if let Some((new_next, value)) = numeric_arg::<i64>(arg, &args, next, "--interval") {
            (next, config.loop_interval_s) = (new_next, value);
        } else if let Some((new_next, value)) = numeric_arg::<usize>(arg, &args, next, "--cmd-len") {
            (next, config.cmd_len) = (new_next, value);
        } else if let Some((new_next, value)) = numeric_arg::<f64>(arg, &args, next, "--top-pct") {
            (next, config.top_pct) = (new_next, value);
        } else if let Some((new_next, value)) = string_arg(arg, &args, next, "--units") {
            next = new_next;
            config.units = match value.as_str() {
                "kb" => Units::Kb,
                "mb" => Units::Mb,
                "mib" => Units::MebiB,
                "human" => Units::Human,
                _ => usage(true),
            };
        } else if let Some((new_next, value)) = string_arg(arg, &args, next, "--pid") {
            next = new_next;
            config.pid_filter.push(value);
        } else if let Some((new_next, value)) = string_arg(arg, &args, next, "--exe") {
            next = new_next;
            config.pid_filter.push(value);
        } else if let Some(new_next) = bool_arg(arg, next, "--collapse-other") {
            (next, config.collapse_other) = (new_next, true);
        } else if let Some(new_next) = bool_arg(arg, next, "--cpu") {
            (next, config.show_cpu) = (new_next, true);
        } else if let Some(new_next) = bool_arg(arg, next, "--debug") {
            (next, config.debug) = (new_next, true);
        } else if arg == "help" || arg == "--help" {
            usage(false);
        } else {
            usage(true);
        }
    }

    config
}

fn bool_arg(arg: &str, next: usize, opt_name: &str) -> Option<usize> {
    if arg == opt_name {
        Some(next)
    } else {
        None
    }
}

fn string_arg(arg: &str, args: &[String], next: usize, opt_name: &str) -> Option<(usize, String)> {
    if arg == opt_name {
        if next < args.len() {
            Some((next + 1, args[next].to_string()))
        } else {
            None
        }
    } else if let Some((first, rest)) = arg.split_once('=') {
        if first == opt_name {
            Some((next, rest.to_string()))
        } else {
            None
        }
    } else {
        None
    }
}

fn numeric_arg<T: std::str::FromStr>(
    arg: &str,
    args: &[String],
    next: usize,
    opt_name: &str,
) -> Option<(usize, T)> {
    if let Some((next, strval)) = string_arg(arg, args, next, opt_name) {
        match strval.parse::<T>() {
            Ok(value) => Some((next, value)),
            _ => usage(true),
        }
    } else {
        None
    }
}

fn usage(is_error: bool) -> ! {
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let out: &mut dyn std::io::Write = if is_error { &mut stderr } else { &mut stdout };

    let _ = out.write(b"memsplit version ");
    let _ = out.write(env!("CARGO_PKG_VERSION").as_bytes());
    let _ = out.write(
        b"

Usage: memsplit [OPTIONS]

Options:
  --group-by exe|cmd|pid
      Key processes into report rows by executable basename, full command, or PID [default: exe]
  --min-delta-kb N
      Tier-2 detail re-parse threshold; 0 on any change, +K on growth only, -K on |change| [default: 0]
  --interval seconds
      Inter-tick sleep; <=0 means run a single tick and exit [default: 0]
  --cmd-len N
      Truncate displayed command strings to this many characters [default: 64]
  --top-pct pct
      Collapse the tail beyond this percentage of the grand total into OTHERS on the first tick [default: 100]
  --units kb|mb|mib|human
      Numeric presentation for memory quantities [default: kb]
  --pid name_or_pid
      Restrict the report to this PID or executable name (repeatable)
  --exe name
      Alias for --pid naming an executable
  --collapse-other
      Merge shSYSV+shOth+stack+text into a single `other` column
  --cpu
      Include a CPU percentage column
  --debug
      Include the raw kernel Pss column
  help
      Print this message
",
    );
    let _ = out.flush();
    std::process::exit(if is_error { USAGE_ERROR } else { 0 });
}
