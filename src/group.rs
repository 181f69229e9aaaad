// GroupAggregator: owns the set of groups keyed by grouping mode, and implements the two-tier
// cost strategy: cheap rollup accounting every tick, expensive detail re-parse only when a
// group's rollup has moved enough since its last detail refresh to warrant it.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::classifier::Category;
use crate::maps::{Chunk, Rollup};
use crate::process::GroupKey;
use crate::types::{Kib, Pid};

// An additive record of category totals. `ptotal` excludes `pswap` by construction; `pss` tracks
// the kernel's own Pss figure (used only for the debug column), which need not equal `ptotal`
// since eSize sometimes diverges from a chunk's raw Pss (see classifier.rs).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub pswap: Kib,
    pub sh_sysv: Kib,
    pub sh_oth: Kib,
    pub stack: Kib,
    pub text: Kib,
    pub data: Kib,
    pub ptotal: Kib,
    pub pss: Kib,
}

impl Summary {
    fn recompute_ptotal(&mut self) {
        self.ptotal = self.sh_sysv + self.sh_oth + self.stack + self.text + self.data;
    }

    // Rollup mapping: anon->data, file->text, shmem->shOth, swap_pss->pswap.
    fn add_rollup(&mut self, r: &Rollup) {
        self.data += r.pss_anon;
        self.text += r.pss_file;
        self.sh_oth += r.pss_shmem;
        self.pswap += r.swap_pss;
        self.pss += r.pss_anon + r.pss_file + r.pss_shmem;
        self.recompute_ptotal();
    }

    fn add_chunk(&mut self, c: &Chunk) {
        match c.category {
            Category::ShSysv => self.sh_sysv += c.e_size,
            Category::ShOth => self.sh_oth += c.e_size,
            Category::Stack => self.stack += c.e_size,
            Category::Text => self.text += c.e_size,
            Category::Data => self.data += c.e_size,
        }
        self.pss += c.pss;
        self.recompute_ptotal();
    }
}

pub struct Group {
    pub key: GroupKey,
    pub label: String,
    pub current_rollup: Summary,
    pub previous_rollup: Summary,
    pub current_detail: Option<Summary>,
    pub previous_detail: Option<Summary>,
    pub current_members: HashSet<Pid>,
    pub previous_members: HashSet<Pid>,
    pub is_new: bool,
    pub is_changed: bool,
    pub delta_pss: i64,
    // The rollup summary as of the last tier-2 refresh (or zero, before the first one). The delta
    // test compares against this, not against the immediately preceding tick, so a string of
    // small sub-threshold changes still accumulates toward eventually triggering.
    baseline_rollup: Summary,
}

impl Group {
    fn new(key: GroupKey, label: String) -> Group {
        Group {
            key,
            label,
            current_rollup: Summary::default(),
            previous_rollup: Summary::default(),
            current_detail: None,
            previous_detail: None,
            current_members: HashSet::new(),
            previous_members: HashSet::new(),
            is_new: true,
            is_changed: false,
            delta_pss: 0,
            baseline_rollup: Summary::default(),
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.current_members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.current_members.len()
    }
}

pub struct GroupAggregator {
    min_delta_kb: i64,
    groups: HashMap<GroupKey, Group>,
}

impl GroupAggregator {
    pub fn new(min_delta_kb: i64) -> GroupAggregator {
        GroupAggregator {
            min_delta_kb,
            groups: HashMap::new(),
        }
    }

    // Must run once at the start of a tick, before any observe_rollup call: rotates every
    // existing group's current state into previous, ready for fresh tier-1 accumulation.
    pub fn begin_tick(&mut self) {
        for group in self.groups.values_mut() {
            group.previous_rollup = group.current_rollup;
            group.current_rollup = Summary::default();
            group.previous_members = std::mem::take(&mut group.current_members);
            group.is_new = false;
            group.is_changed = false;
        }
    }

    // Tier 1: accumulate one qualified PID's rollup into its group, creating the group on first
    // sight of its key.
    pub fn observe_rollup(&mut self, pid: Pid, key: GroupKey, label: &str, rollup: &Rollup) {
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| Group::new(key, label.to_string()));
        group.current_members.insert(pid);
        group.current_rollup.add_rollup(rollup);
    }

    pub fn group(&self, key: &GroupKey) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn keys(&self) -> Vec<GroupKey> {
        self.groups.keys().cloned().collect()
    }

    // Fire if this group has never had a detail summary, or the delta test against the last
    // tier-2 baseline triggers.
    pub fn needs_detail(&self, key: &GroupKey) -> bool {
        match self.groups.get(key) {
            Some(group) => {
                group.current_detail.is_none()
                    || delta_triggers(self.min_delta_kb, &group.current_rollup, &group.baseline_rollup)
            }
            None => false,
        }
    }

    // Tier 2: replace a group's detail summary with one freshly built from its members'
    // classified chunks. Member PIDs that vanished mid-parse are simply absent from
    // `chunks_by_member`; this never fails the group.
    pub fn apply_detail(&mut self, key: &GroupKey, chunks_by_member: &[(Pid, Vec<Chunk>)]) {
        if let Some(group) = self.groups.get_mut(key) {
            let mut fresh = Summary::default();
            for (_, chunks) in chunks_by_member {
                for c in chunks {
                    fresh.add_chunk(c);
                }
            }
            group.previous_detail = group.current_detail.take();
            group.current_detail = Some(fresh);
        }
    }

    // Drop a member PID that vanished between its tier-1 and tier-2 reads.
    pub fn drop_member(&mut self, key: &GroupKey, pid: Pid) {
        if let Some(group) = self.groups.get_mut(key) {
            group.current_members.remove(&pid);
        }
    }

    // Step 5/7 of a tick: compute delta_pss and is_changed for every group. Returns the keys of
    // groups with no current members, which the caller emits once with annotation `x` before
    // calling sweep().
    pub fn finish_tick(&mut self) -> Vec<GroupKey> {
        let mut orphaned = vec![];
        for (key, group) in self.groups.iter_mut() {
            let d = pss_delta(&group.current_rollup, &group.baseline_rollup);
            group.delta_pss = d;
            let fires = group.current_detail.is_none() || triggers(self.min_delta_kb, d);
            if fires {
                group.baseline_rollup = group.current_rollup;
            }
            let membership_changed = group.current_members != group.previous_members;
            group.is_changed = membership_changed || triggers(self.min_delta_kb, d);
            if group.is_orphaned() {
                orphaned.push(key.clone());
            }
        }
        orphaned
    }

    // Removes groups already emitted with a final `x` annotation.
    pub fn sweep(&mut self, orphaned: &[GroupKey]) {
        for key in orphaned {
            self.groups.remove(key);
        }
    }
}

fn pss_delta(now: &Summary, prev: &Summary) -> i64 {
    (now.pss as i64 - prev.pss as i64) + (now.pswap as i64 - prev.pswap as i64)
}

fn delta_triggers(threshold: i64, now: &Summary, prev: &Summary) -> bool {
    triggers(threshold, pss_delta(now, prev))
}

fn triggers(threshold: i64, d: i64) -> bool {
    if threshold <= 0 {
        d.abs() >= -threshold
    } else {
        d >= threshold
    }
}
