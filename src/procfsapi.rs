// This creates an API by which the core can access the underlying computing system (`/proc`,
// `/sys/block`, the system clock), allowing the system to be virtualized. In turn, that allows
// sensible test cases to be written without touching the real kernel.

use crate::types::{Pid, Uid};

use std::fs;
use std::io;
use std::os::linux::fs::MetadataExt;
use std::path;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
use std::collections::HashMap;

// Distinguishes the error kinds the core needs to branch on: a missing or permission-denied file
// disqualifies a single PID without aborting the tick; anything else is unexpected and is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    NotFound,
    PermissionDenied,
    Other(String),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> ReadError {
        match e.kind() {
            io::ErrorKind::NotFound => ReadError::NotFound,
            io::ErrorKind::PermissionDenied => ReadError::PermissionDenied,
            _ => ReadError::Other(e.to_string()),
        }
    }
}

pub trait ProcfsAPI {
    // Open /proc/<path> (which can have multiple path elements, eg, {PID}/filename), read it, and
    // return its entire contents as a string.
    fn read_proc_to_string(&self, path: &str) -> Result<String, ReadError>;

    // Return (pid,uid) for every file /proc/{PID}. Return a sensible error message in case
    // something goes really, really wrong, but otherwise try to make the best of it.
    fn read_proc_pids(&self) -> Result<Vec<(Pid, Uid)>, String>;

    // Names (eg "zram0") of compressed-swap block devices found under /sys/block. Empty if none.
    fn list_zram_devices(&self) -> Vec<String>;

    // Open /sys/block/<dev>/<attr> and return its contents as a string.
    fn read_sys_to_string(&self, dev: &str, attr: &str) -> Result<String, ReadError>;

    // Return the value of CLK_TCK, or 0 on error.
    fn clock_ticks_per_sec(&self) -> u64;

    // Return the page size measured in KiB.
    fn page_size_in_kib(&self) -> u64;

    // Return the current time in seconds since the Unix epoch.
    fn now_in_secs_since_epoch(&self) -> u64;
}

// RealFS is used to actually access /proc, /sys/block, and the system clock.

pub struct RealFS {}

impl RealFS {
    pub fn new() -> RealFS {
        RealFS {}
    }
}

impl Default for RealFS {
    fn default() -> RealFS {
        RealFS::new()
    }
}

impl ProcfsAPI for RealFS {
    fn read_proc_to_string(&self, path: &str) -> Result<String, ReadError> {
        Ok(fs::read_to_string(path::Path::new(&format!(
            "/proc/{path}"
        )))?)
    }

    fn read_proc_pids(&self) -> Result<Vec<(Pid, Uid)>, String> {
        let mut pids = vec![];
        let dir = fs::read_dir("/proc").map_err(|_| "Could not open /proc".to_string())?;
        for dirent in dir.flatten() {
            if let Ok(meta) = dirent.metadata() {
                let uid = meta.st_uid();
                if let Some(name) = dirent.path().file_name() {
                    if let Ok(pid) = name.to_string_lossy().parse::<Pid>() {
                        pids.push((pid, uid));
                    }
                }
            }
        }
        Ok(pids)
    }

    fn list_zram_devices(&self) -> Vec<String> {
        let mut devices = vec![];
        if let Ok(dir) = fs::read_dir("/sys/block") {
            for dirent in dir.flatten() {
                if let Some(name) = dirent.path().file_name() {
                    let name = name.to_string_lossy();
                    if name.starts_with("zram") {
                        devices.push(name.to_string());
                    }
                }
            }
        }
        devices.sort();
        devices
    }

    fn read_sys_to_string(&self, dev: &str, attr: &str) -> Result<String, ReadError> {
        Ok(fs::read_to_string(path::Path::new(&format!(
            "/sys/block/{dev}/{attr}"
        )))?)
    }

    fn clock_ticks_per_sec(&self) -> u64 {
        unsafe { libc::sysconf(libc::_SC_CLK_TCK) as u64 }
    }

    fn page_size_in_kib(&self) -> u64 {
        (page_size::get() / 1024) as u64
    }

    fn now_in_secs_since_epoch(&self) -> u64 {
        unix_now()
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

// MockFS is used for testing; it is instantiated with the values we want it to return.

#[cfg(test)]
pub struct MockFS {
    files: HashMap<String, String>,
    pids: Vec<(Pid, Uid)>,
    sys_files: HashMap<String, String>,
    zram_devices: Vec<String>,
    ticks_per_sec: u64,
    pagesz: u64,
    now: u64,
}

#[cfg(test)]
impl MockFS {
    pub fn new(files: HashMap<String, String>, pids: Vec<(Pid, Uid)>) -> MockFS {
        MockFS {
            files,
            pids,
            sys_files: HashMap::new(),
            zram_devices: vec![],
            ticks_per_sec: 100,
            pagesz: 4,
            now: 0,
        }
    }

    pub fn with_now(mut self, now: u64) -> MockFS {
        self.now = now;
        self
    }

    pub fn with_ticks_per_sec(mut self, t: u64) -> MockFS {
        self.ticks_per_sec = t;
        self
    }

    pub fn with_zram(mut self, dev: &str, attrs: HashMap<String, String>) -> MockFS {
        self.zram_devices.push(dev.to_string());
        self.zram_devices.sort();
        for (attr, value) in attrs {
            self.sys_files.insert(format!("{dev}/{attr}"), value);
        }
        self
    }
}

#[cfg(test)]
impl ProcfsAPI for MockFS {
    fn read_proc_to_string(&self, path: &str) -> Result<String, ReadError> {
        match self.files.get(path) {
            Some(s) => Ok(s.clone()),
            None => Err(ReadError::NotFound),
        }
    }

    fn read_proc_pids(&self) -> Result<Vec<(Pid, Uid)>, String> {
        Ok(self.pids.clone())
    }

    fn list_zram_devices(&self) -> Vec<String> {
        self.zram_devices.clone()
    }

    fn read_sys_to_string(&self, dev: &str, attr: &str) -> Result<String, ReadError> {
        match self.sys_files.get(&format!("{dev}/{attr}")) {
            Some(s) => Ok(s.clone()),
            None => Err(ReadError::NotFound),
        }
    }

    fn clock_ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    fn page_size_in_kib(&self) -> u64 {
        self.pagesz
    }

    fn now_in_secs_since_epoch(&self) -> u64 {
        self.now
    }
}
