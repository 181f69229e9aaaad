// SysFacts: system-wide vitals read once per tick.
//
// Failure to read a required meminfo field is fatal for the tick and is surfaced to the caller;
// every other field here is best-effort.

use crate::procfsapi::ProcfsAPI;
use crate::types::Kib;

#[derive(Debug, Clone, PartialEq)]
pub struct ZramFacts {
    pub raw_kb: Kib,
    pub compressed_kb: Kib,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Facts {
    pub mem_total_kb: Kib,
    pub mem_avail_kb: Kib,
    pub shmem_kb: Kib,
    pub dirty_kb: Kib,
    pub pids_total: usize,
    pub zram: Option<ZramFacts>,
    // Sum of all fields on the aggregate "cpu" line of /proc/stat: the wall-clock tick counter
    // shared by every process's CPU-percentage denominator.
    pub cpu_totals: u64,
}

pub fn sample(fs: &dyn ProcfsAPI) -> Result<Facts, String> {
    let meminfo = fs
        .read_proc_to_string("meminfo")
        .map_err(|e| format!("Could not read /proc/meminfo: {e:?}"))?;
    let mem_total_kb = find_meminfo_field(&meminfo, "MemTotal:")
        .ok_or_else(|| "Could not find MemTotal in /proc/meminfo".to_string())?;
    let mem_avail_kb = find_meminfo_field(&meminfo, "MemAvailable:")
        .ok_or_else(|| "Could not find MemAvailable in /proc/meminfo".to_string())?;
    let shmem_kb = find_meminfo_field(&meminfo, "Shmem:").unwrap_or(0);
    let dirty_kb = find_meminfo_field(&meminfo, "Dirty:").unwrap_or(0);

    let stat = fs
        .read_proc_to_string("stat")
        .map_err(|e| format!("Could not read /proc/stat: {e:?}"))?;
    let cpu_totals = find_cpu_totals(&stat)
        .ok_or_else(|| "Could not find cpu line in /proc/stat".to_string())?;

    let pids_total = fs
        .read_proc_pids()
        .map_err(|e| format!("Could not enumerate /proc: {e}"))?
        .len();

    let zram = sample_zram(fs);

    Ok(Facts {
        mem_total_kb,
        mem_avail_kb,
        shmem_kb,
        dirty_kb,
        pids_total,
        zram,
        cpu_totals,
    })
}

fn find_meminfo_field(text: &str, tag: &str) -> Option<Kib> {
    for l in text.split('\n') {
        if let Some(rest) = l.strip_prefix(tag) {
            let fields = rest.split_ascii_whitespace().collect::<Vec<&str>>();
            if let Some(n) = fields.first().and_then(|s| s.parse::<Kib>().ok()) {
                return Some(n);
            }
        }
    }
    None
}

fn find_cpu_totals(stat: &str) -> Option<u64> {
    for l in stat.split('\n') {
        if let Some(rest) = l.strip_prefix("cpu ") {
            let mut total = 0u64;
            for field in rest.split_ascii_whitespace() {
                total += field.parse::<u64>().ok()?;
            }
            return Some(total);
        }
    }
    None
}

// Sum raw/compressed size across every zram device that currently holds data; absent if none do.
fn sample_zram(fs: &dyn ProcfsAPI) -> Option<ZramFacts> {
    let mut raw_kb = 0u64;
    let mut compressed_kb = 0u64;
    let mut any_active = false;
    for dev in fs.list_zram_devices() {
        let mm_stat = fs.read_sys_to_string(&dev, "mm_stat").ok()?;
        let fields = mm_stat.split_ascii_whitespace().collect::<Vec<&str>>();
        if fields.len() < 2 {
            continue;
        }
        let orig_bytes: u64 = fields[0].parse().ok()?;
        let compr_bytes: u64 = fields[1].parse().ok()?;
        if orig_bytes > 0 {
            any_active = true;
        }
        raw_kb += orig_bytes / 1024;
        compressed_kb += compr_bytes / 1024;
    }
    if !any_active {
        return None;
    }
    let ratio = if compressed_kb > 0 {
        raw_kb as f64 / compressed_kb as f64
    } else {
        0.0
    };
    Some(ZramFacts {
        raw_kb,
        compressed_kb,
        ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfsapi::MockFS;
    use crate::util::map;

    #[test]
    fn test_sample_basic() {
        let files = map! {
            "meminfo".to_string() => "MemTotal:       16093776 kB\nMemAvailable:    8162068 kB\nShmem:            102400 kB\nDirty:              4096 kB\n".to_string(),
            "stat".to_string() => "cpu  241155 582 127006 2000000 3816 0 100 0 0 0\ncpu0 32528 189 19573 250000 1149 0 10 0 0 0\n".to_string()
        };
        let fs = MockFS::new(files, vec![(1, 0), (2, 0)]);
        let facts = sample(&fs).expect("must parse");
        assert!(facts.mem_total_kb == 16093776);
        assert!(facts.mem_avail_kb == 8162068);
        assert!(facts.shmem_kb == 102400);
        assert!(facts.dirty_kb == 4096);
        assert!(facts.pids_total == 2);
        assert!(facts.cpu_totals == 241155 + 582 + 127006 + 2000000 + 3816 + 100);
        assert!(facts.zram.is_none());
    }

    #[test]
    fn test_sample_missing_memtotal_is_fatal() {
        let files = map! {
            "meminfo".to_string() => "Dirty:  100 kB\n".to_string(),
            "stat".to_string() => "cpu  1 1 1 1 1 1 1 1\n".to_string()
        };
        let fs = MockFS::new(files, vec![]);
        assert!(sample(&fs).is_err());
    }

    #[test]
    fn test_sample_zram_active() {
        let files = map! {
            "meminfo".to_string() => "MemTotal: 1000 kB\nMemAvailable: 500 kB\n".to_string(),
            "stat".to_string() => "cpu  1 1 1 1 1 1 1 1\n".to_string()
        };
        let zram_attrs = map! {
            "mm_stat".to_string() => "2048000 1024000 1040000 0 0 0 0 0 0".to_string()
        };
        let fs = MockFS::new(files, vec![]).with_zram("zram0", zram_attrs);
        let facts = sample(&fs).expect("must parse");
        let zram = facts.zram.expect("zram should be active");
        assert!(zram.raw_kb == 2000);
        assert!(zram.compressed_kb == 1000);
        assert!(zram.ratio == 2.0);
    }

    #[test]
    fn test_sample_zram_inactive_device_is_absent() {
        let files = map! {
            "meminfo".to_string() => "MemTotal: 1000 kB\nMemAvailable: 500 kB\n".to_string(),
            "stat".to_string() => "cpu  1 1 1 1 1 1 1 1\n".to_string()
        };
        let zram_attrs = map! {
            "mm_stat".to_string() => "0 0 0 0 0 0 0 0 0".to_string()
        };
        let fs = MockFS::new(files, vec![]).with_zram("zram0", zram_attrs);
        let facts = sample(&fs).expect("must parse");
        assert!(facts.zram.is_none());
    }
}
