// Classifier: assigns each Chunk a Category and an effective size.
//
// The decision procedure is applied in order; first match wins. The pseudo-stack guard handles a
// kernel quirk where the stack's guard page is reported with a bogus Size and the real stack is
// the anonymous writable region that follows it; without it, thread-rich programs have their
// stacks mis-categorized as Data. The [10000, 20000] kB band is empirical; it is preserved
// verbatim rather than re-derived.

use crate::maps::Chunk;
use crate::types::Kib;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    ShSysv,
    ShOth,
    Stack,
    Text,
    Data,
}

const GUARD_PAGE_SIZE_KB: Kib = 4;
const GUARD_STACK_MIN_KB: Kib = 10000;
const GUARD_STACK_MAX_KB: Kib = 20000;

// Classifies every chunk in place. Chunks must be in the order they appeared in the detail file,
// since the pseudo-stack guard inspects the chunk that immediately follows.
pub fn classify(chunks: &mut [Chunk]) {
    let mut i = 0;
    while i < chunks.len() {
        if i + 1 < chunks.len() && is_pseudo_stack_guard(&chunks[i], &chunks[i + 1]) {
            chunks[i].category = Category::Data;
            chunks[i].e_size = 0;
            let next = &mut chunks[i + 1];
            next.category = Category::Stack;
            next.e_size = next.private + next.swap;
            i += 2;
            continue;
        }
        classify_one(&mut chunks[i]);
        i += 1;
    }
}

fn classify_one(c: &mut Chunk) {
    if c.is_shared() {
        c.category = if c.backing_contains("SYSV") {
            Category::ShSysv
        } else {
            Category::ShOth
        };
        c.e_size = c.pss;
        return;
    }
    if c.backing.as_deref() == Some("[stack]") {
        c.category = Category::Stack;
        c.e_size = c.private;
        return;
    }
    let perm_bits = &c.perms[0..3];
    if perm_bits == "---" {
        c.category = Category::Data;
        c.e_size = 0;
        return;
    }
    if perm_bits.contains('w') {
        c.category = Category::Data;
        c.e_size = c.rss + c.swap;
        return;
    }
    c.category = Category::Text;
    c.e_size = c.pss + c.swap;
}

fn is_pseudo_stack_guard(guard: &Chunk, next: &Chunk) -> bool {
    guard.size == GUARD_PAGE_SIZE_KB
        && guard.perms == "---p"
        && guard.backing.is_none()
        && guard.offset == guard.begin
        && next.begin == guard.end // the next chunk is contiguous with the guard page
        && next.perms.contains('w')
        && next.backing.is_none()
        && next.offset == next.begin
        && next.size >= GUARD_STACK_MIN_KB
        && next.size <= GUARD_STACK_MAX_KB
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::parse_detail;

    fn classified(text: &str) -> Vec<Chunk> {
        let mut chunks = parse_detail(text);
        classify(&mut chunks);
        chunks
    }

    #[test]
    fn test_text_mapping() {
        let text = "00400000-00452000 r-xp 00000000 08:02 1 /usr/bin/foo\n\
                     Pss:                 40 kB\n\
                     Swap:                 0 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Text);
        assert!(chunks[0].e_size == 40);
    }

    #[test]
    fn test_heap_mapping() {
        let text = "7f0000000000-7f0000100000 rw-p 00000000 00:00 0\n\
                     Rss:               1000 kB\n\
                     Private_Dirty:     1000 kB\n\
                     Swap:               200 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Data);
        assert!(chunks[0].e_size == 1200);
    }

    #[test]
    fn test_sysv_shared() {
        let text = "7fAAA000-7fBBB000 rw-s 00000000 00:05 1 /SYSV00000000 (deleted)\n\
                     Pss:                512 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::ShSysv);
        assert!(chunks[0].e_size == 512);
    }

    #[test]
    fn test_other_shared() {
        let text = "7fAAA000-7fBBB000 r--s 00000000 00:05 1 /dev/shm/foo\n\
                     Pss:                256 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::ShOth);
        assert!(chunks[0].e_size == 256);
    }

    #[test]
    fn test_explicit_stack_segment() {
        let text = "7ffeeb000000-7ffeeb021000 rw-p 00000000 00:00 0 [stack]\n\
                     Private_Dirty:      100 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Stack);
        assert!(chunks[0].e_size == 100);
    }

    #[test]
    fn test_no_access_mapping() {
        let text = "00400000-00401000 ---p 00000000 00:00 0\n\
                     Rss:                100 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Data);
        assert!(chunks[0].e_size == 0);
    }

    #[test]
    fn test_pseudo_stack_guard_applies() {
        let text = "00400000-00401000 ---p 00400000 00:00 0\n\
                     Size:                 4 kB\n\
                     00401000-00c01000 rw-p 00401000 00:00 0\n\
                     Size:             10240 kB\n\
                     Private_Clean:    10240 kB\n\
                     Swap:                 0 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Data);
        assert!(chunks[0].e_size == 0);
        assert!(chunks[1].category == Category::Stack);
        assert!(chunks[1].e_size == 10240);
    }

    #[test]
    fn test_pseudo_stack_guard_violated_by_backing() {
        // Guard page has a backing file, so the guess should not fire; both chunks fall through to
        // their unguarded categorization.
        let text = "00400000-00401000 ---p 00400000 08:02 1 /weird\n\
                     Size:                 4 kB\n\
                     00401000-00c01000 rw-p 00401000 00:00 0\n\
                     Size:             10240 kB\n\
                     Rss:              10240 kB\n";
        let chunks = classified(text);
        assert!(chunks[0].category == Category::Data);
        assert!(chunks[0].e_size == 0); // still Data via the ---p rule
        assert!(chunks[1].category == Category::Data); // NOT reclassified as Stack
        assert!(chunks[1].e_size == 10240); // rss + swap, via the unguarded "w in perms" rule
    }

    #[test]
    fn test_pseudo_stack_guard_size_band_boundary() {
        // 9999 kB is just outside the empirical band: guard must not apply.
        let text = "00400000-00401000 ---p 00400000 00:00 0\n\
                     Size:                 4 kB\n\
                     00401000-00c01000 rw-p 00401000 00:00 0\n\
                     Size:              9999 kB\n\
                     Rss:               9999 kB\n";
        let chunks = classified(text);
        assert!(chunks[1].category == Category::Data);
        assert!(chunks[1].e_size == 9999); // rss + swap, via the unguarded "w in perms" rule
    }

    #[test]
    fn test_classification_is_idempotent() {
        let text = "00400000-00452000 r-xp 00000000 08:02 1 /usr/bin/foo\nPss: 40 kB\n";
        let mut chunks = parse_detail(text);
        classify(&mut chunks);
        let first = chunks.clone();
        classify(&mut chunks);
        assert!(chunks == first);
    }
}
