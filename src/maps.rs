// MapsParser: turns the detailed per-PID memory-map file (`/proc/pid/smaps`) into a sequence of
// Chunks, and the per-PID summary file (`/proc/pid/smaps_rollup`) into a Rollup.
//
// Lines that match neither the section grammar nor the item grammar are diagnostic errors: logged,
// and the parse continues. Tags we don't recognize but which otherwise look like `<Name>: <uint>
// kB` are silently skipped.

use crate::classifier::Category;
use crate::log;
use crate::types::Kib;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub begin: u64,
    pub end: u64,
    pub perms: String, // 4-char token, eg "rw-s"
    pub offset: u64,
    pub backing: Option<String>,
    pub size: Kib,
    pub rss: Kib,
    pub pss: Kib,
    pub shared: Kib,
    pub private: Kib,
    pub swap: Kib,
    // Filled in by the classifier; Data/0 until then.
    pub category: Category,
    pub e_size: Kib,
}

impl Chunk {
    fn new(begin: u64, end: u64, perms: String, offset: u64, backing: Option<String>) -> Chunk {
        Chunk {
            begin,
            end,
            perms,
            offset,
            backing,
            size: 0,
            rss: 0,
            pss: 0,
            shared: 0,
            private: 0,
            swap: 0,
            category: Category::Data,
            e_size: 0,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.perms.as_bytes().get(3) == Some(&b's')
    }

    pub fn backing_contains(&self, needle: &str) -> bool {
        self.backing.as_deref().is_some_and(|b| b.contains(needle))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rollup {
    pub pss_anon: Kib,
    pub pss_file: Kib,
    pub pss_shmem: Kib,
    pub swap_pss: Kib,
}

pub fn parse_detail(text: &str) -> Vec<Chunk> {
    let mut chunks = vec![];
    let mut current: Option<Chunk> = None;
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some(c) = try_parse_section(line) {
            if let Some(prev) = current.take() {
                chunks.push(prev);
            }
            current = Some(c);
            continue;
        }
        if let Some((tag, value)) = try_parse_item(line) {
            if let Some(c) = current.as_mut() {
                apply_item(c, tag, value);
            }
            continue;
        }
        log::diagnostic(&format!("Unparseable line in smaps: {line}"));
    }
    if let Some(prev) = current.take() {
        chunks.push(prev);
    }
    chunks
}

pub fn parse_rollup(text: &str) -> Rollup {
    let mut r = Rollup::default();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some((tag, value)) = try_parse_item(line) {
            match tag {
                "Pss_Anon" => r.pss_anon = value,
                "Pss_File" => r.pss_file = value,
                "Pss_Shmem" => r.pss_shmem = value,
                "SwapPss" => r.swap_pss = value,
                _ => {}
            }
            continue;
        }
        log::diagnostic(&format!("Unparseable line in smaps_rollup: {line}"));
    }
    r
}

fn try_parse_section(line: &str) -> Option<Chunk> {
    let fields = line.split_ascii_whitespace().collect::<Vec<&str>>();
    if fields.len() < 5 {
        return None;
    }
    let (lo, hi) = fields[0].split_once('-')?;
    let begin = u64::from_str_radix(lo, 16).ok()?;
    let end = u64::from_str_radix(hi, 16).ok()?;
    if fields[1].len() != 4 || !fields[1].bytes().all(|b| b"rwxsp-".contains(&b)) {
        return None;
    }
    let offset = u64::from_str_radix(fields[2], 16).ok()?;
    // fields[3] is dev (xx:yy), fields[4] is the inode; anything after is the backing path.
    if !fields[3].contains(':') {
        return None;
    }
    fields[4].parse::<u64>().ok()?;
    let backing = if fields.len() > 5 {
        Some(fields[5..].join(" "))
    } else {
        None
    };
    Some(Chunk::new(begin, end, fields[1].to_string(), offset, backing))
}

fn try_parse_item(line: &str) -> Option<(&str, Kib)> {
    let (tag, rest) = line.split_once(':')?;
    if tag.is_empty() || tag.contains(' ') {
        return None;
    }
    let rest = rest.trim();
    let rest = rest.strip_suffix("kB")?.trim();
    let value = rest.parse::<Kib>().ok()?;
    Some((tag, value))
}

fn apply_item(c: &mut Chunk, tag: &str, value: Kib) {
    match tag {
        "Size" => c.size = value,
        "Rss" => c.rss = value,
        "Pss" => c.pss = value,
        "Shared_Clean" | "Shared_Dirty" => c.shared += value,
        "Private_Clean" | "Private_Dirty" => c.private += value,
        "Swap" => c.swap = value,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_one_section() {
        let text = "00400000-00452000 r-xp 00000000 08:02 1234567 /usr/bin/foo\n\
                     Size:                80 kB\n\
                     Rss:                 80 kB\n\
                     Pss:                 40 kB\n\
                     Shared_Clean:        80 kB\n\
                     Shared_Dirty:         0 kB\n\
                     Private_Clean:        0 kB\n\
                     Private_Dirty:        0 kB\n\
                     Swap:                 0 kB\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 1);
        let c = &chunks[0];
        assert!(c.begin == 0x00400000);
        assert!(c.end == 0x00452000);
        assert!(c.perms == "r-xp");
        assert!(c.backing.as_deref() == Some("/usr/bin/foo"));
        assert!(c.size == 80);
        assert!(c.rss == 80);
        assert!(c.pss == 40);
        assert!(c.shared == 80);
        assert!(c.private == 0);
        assert!(c.swap == 0);
    }

    #[test]
    fn test_parse_anonymous_section_no_backing() {
        let text = "7f0000000000-7f0000100000 rw-p 00000000 00:00 0\n\
                     Rss:               1000 kB\n\
                     Private_Dirty:     1000 kB\n\
                     Swap:               200 kB\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 1);
        assert!(chunks[0].backing.is_none());
        assert!(chunks[0].rss == 1000);
        assert!(chunks[0].private == 1000);
        assert!(chunks[0].swap == 200);
    }

    #[test]
    fn test_parse_sysv_section() {
        let text = "7fAAA000-7fBBB000 rw-s 00000000 00:05 999 /SYSV00000000 (deleted)\n\
                     Pss:                512 kB\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 1);
        assert!(chunks[0].is_shared());
        assert!(chunks[0].backing_contains("SYSV"));
        assert!(chunks[0].pss == 512);
    }

    #[test]
    fn test_unrecognized_tag_is_skipped_not_fatal() {
        let text = "00400000-00452000 r-xp 00000000 08:02 1 /x\n\
                     Size:             4 kB\n\
                     Locked:           4 kB\n\
                     VmFlags: rd ex mr mw me dw\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 1);
        assert!(chunks[0].size == 4);
    }

    #[test]
    fn test_garbage_line_is_diagnostic_and_parse_continues() {
        let text = "not a valid section line at all\n\
                     00400000-00452000 r-xp 00000000 08:02 1 /x\n\
                     Size:             4 kB\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 1);
        assert!(chunks[0].size == 4);
    }

    #[test]
    fn test_two_sections() {
        let text = "00400000-00401000 ---p 00000000 00:00 0\n\
                     Size:                 4 kB\n\
                     00401000-00c01000 rw-p 00401000 00:00 0\n\
                     Size:             10240 kB\n\
                     Private_Clean:    10240 kB\n";
        let chunks = parse_detail(text);
        assert!(chunks.len() == 2);
        assert!(chunks[0].end == chunks[1].begin);
    }

    #[test]
    fn test_parse_rollup() {
        let text = "Rss:              2000 kB\n\
                     Pss:              1500 kB\n\
                     Pss_Anon:         1000 kB\n\
                     Pss_File:          300 kB\n\
                     Pss_Shmem:         200 kB\n\
                     SwapPss:            50 kB\n";
        let r = parse_rollup(text);
        assert!(r.pss_anon == 1000);
        assert!(r.pss_file == 300);
        assert!(r.pss_shmem == 200);
        assert!(r.swap_pss == 50);
    }
}
