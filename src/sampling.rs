// SamplingLoop: drives one tick of enumeration, aggregation and delta detection, and emits a
// Report for the formatting layer to render.

use std::collections::HashMap;

use crate::classifier::classify;
use crate::config::{Config, GroupBy};
use crate::group::{Group, GroupAggregator, Summary};
use crate::log;
use crate::maps::{parse_detail, parse_rollup};
use crate::process::{DisqualifyReason, GroupKey, ProcessRecord};
use crate::procfsapi::{ProcfsAPI, ReadError};
use crate::sysfacts::{self, Facts};
use crate::types::{Kib, Pid};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Annotation {
    Total,
    Appeared,
    Overflow,
    Gone,
    Delta(i64),
    None,
}

pub struct GroupRow {
    pub label: String,
    pub annotation: Annotation,
    pub cpu_pct: f64,
    pub summary: Summary,
    // Count of contributing processes, or the negated PID for a pid-grouped singleton.
    pub number: i64,
}

pub struct Report {
    pub timestamp_secs: u64,
    pub facts: Facts,
    pub pids_qualified: usize,
    pub pids_total_non_kernel: usize,
    pub grand_total: GroupRow,
    pub rows: Vec<GroupRow>,
}

pub struct SamplingLoop {
    config: Config,
    records: HashMap<Pid, ProcessRecord>,
    groups: GroupAggregator,
    wall_ticks_prev: Option<u64>,
    is_first: bool,
}

impl SamplingLoop {
    pub fn new(config: Config) -> SamplingLoop {
        SamplingLoop {
            groups: GroupAggregator::new(config.min_delta_kb),
            config,
            records: HashMap::new(),
            wall_ticks_prev: None,
            is_first: true,
        }
    }

    pub fn tick(&mut self, fs: &dyn ProcfsAPI) -> Result<Report, String> {
        let facts = sysfacts::sample(fs)?;
        let candidates = fs.read_proc_pids()?;

        for record in self.records.values_mut() {
            record.alive = false;
        }
        self.groups.begin_tick();

        let mut pids_total_non_kernel = 0usize;
        let mut pids_qualified = 0usize;

        for (pid, _uid) in &candidates {
            let record = self
                .records
                .entry(*pid)
                .or_insert_with(|| ProcessRecord::new(*pid));
            record.alive = true;
            record.ensure_identity(fs, &self.config);

            if record.disqualified == Some(DisqualifyReason::KernelProcess) {
                continue;
            }
            pids_total_non_kernel += 1;
            if record.disqualified.is_some() {
                continue;
            }

            record.sample_cpu(fs, facts.cpu_totals, self.wall_ticks_prev);

            let rollup_text = match fs.read_proc_to_string(&format!("{pid}/smaps_rollup")) {
                Ok(t) => t,
                Err(ReadError::Other(msg)) => {
                    log::error(&format!("failed to read smaps_rollup for pid {pid}: {msg}"));
                    continue;
                }
                Err(_) => continue,
            };
            let rollup = parse_rollup(&rollup_text);
            record.last_rollup = Some(rollup);

            let key = record.group_key.clone().expect("resolved identity has a group key");
            let label = group_label(record, self.config.group_by);
            self.groups.observe_rollup(*pid, key, &label, &rollup);
            pids_qualified += 1;
        }

        for key in self.groups.keys() {
            if !self.groups.needs_detail(&key) {
                continue;
            }
            let member_pids: Vec<Pid> = self
                .groups
                .group(&key)
                .map(|g| g.current_members.iter().copied().collect())
                .unwrap_or_default();
            let mut chunks_by_member = vec![];
            for pid in member_pids {
                match fs.read_proc_to_string(&format!("{pid}/smaps")) {
                    Ok(text) => {
                        let mut chunks = parse_detail(&text);
                        classify(&mut chunks);
                        chunks_by_member.push((pid, chunks));
                    }
                    Err(ReadError::Other(msg)) => {
                        log::error(&format!("failed to read smaps for pid {pid}: {msg}"));
                        self.groups.drop_member(&key, pid);
                    }
                    Err(_) => self.groups.drop_member(&key, pid),
                }
            }
            self.groups.apply_detail(&key, &chunks_by_member);
        }

        self.wall_ticks_prev = Some(facts.cpu_totals);

        let gone = self.groups.finish_tick();

        let mut rows: Vec<GroupRow> = self
            .groups
            .keys()
            .into_iter()
            .filter(|k| !gone.contains(k))
            .filter_map(|k| self.groups.group(&k).map(|g| self.build_row(g, false)))
            .collect();
        rows.sort_by(|a, b| b.summary.ptotal.cmp(&a.summary.ptotal));

        if self.is_first {
            rows = collapse_tail(rows, self.config.top_pct);
        }

        let grand_total = grand_total_row(&rows);

        for key in &gone {
            if let Some(g) = self.groups.group(key) {
                rows.push(self.build_row(g, true));
            }
        }
        self.groups.sweep(&gone);

        self.records.retain(|_, r| r.alive);

        self.is_first = false;

        Ok(Report {
            timestamp_secs: fs.now_in_secs_since_epoch(),
            facts,
            pids_qualified,
            pids_total_non_kernel,
            grand_total,
            rows,
        })
    }

    fn build_row(&self, group: &Group, use_previous: bool) -> GroupRow {
        let summary = display_summary(group, use_previous);
        let members: Vec<Pid> = if use_previous {
            group.previous_members.iter().copied().collect()
        } else {
            group.current_members.iter().copied().collect()
        };
        let cpu_pct: f64 = members
            .iter()
            .filter_map(|pid| self.records.get(pid))
            .map(|r| r.cpu_pct)
            .sum();
        let number = match &group.key {
            GroupKey::Pid(pid) => -(*pid as i64),
            _ => members.len().max(1) as i64,
        };
        GroupRow {
            label: group.label.clone(),
            annotation: row_annotation(group, use_previous),
            cpu_pct,
            summary,
            number,
        }
    }
}

fn group_label(record: &ProcessRecord, group_by: GroupBy) -> String {
    let identity = record.identity.as_ref().expect("qualified record has an identity");
    match group_by {
        GroupBy::Exe => identity.exe_basename.clone(),
        GroupBy::Cmd => identity.command.clone(),
        GroupBy::Pid => record.pid.to_string(),
    }
}

// The displayed pss/pswap always come from the rollup summary, even when a detail summary is
// present; the category breakdown (shSYSV/shOth/stack/text/data) comes from the detail summary
// when one exists, and otherwise falls back to the coarser rollup-derived split.
fn display_summary(group: &Group, use_previous: bool) -> Summary {
    let (detail, rollup) = if use_previous {
        (group.previous_detail, group.previous_rollup)
    } else {
        (group.current_detail, group.current_rollup)
    };
    let mut s = detail.unwrap_or(rollup);
    s.pswap = rollup.pswap;
    s.pss = rollup.pss;
    s
}

fn row_annotation(group: &Group, use_previous: bool) -> Annotation {
    if use_previous {
        return Annotation::Gone;
    }
    if group.is_new {
        Annotation::Appeared
    } else if group.is_changed {
        Annotation::Delta(group.delta_pss)
    } else {
        Annotation::None
    }
}

fn grand_total_row(rows: &[GroupRow]) -> GroupRow {
    let mut summary = Summary::default();
    let mut cpu_pct = 0.0;
    for r in rows {
        summary.pswap += r.summary.pswap;
        summary.sh_sysv += r.summary.sh_sysv;
        summary.sh_oth += r.summary.sh_oth;
        summary.stack += r.summary.stack;
        summary.text += r.summary.text;
        summary.data += r.summary.data;
        summary.ptotal += r.summary.ptotal;
        summary.pss += r.summary.pss;
        cpu_pct += r.cpu_pct;
    }
    GroupRow {
        label: "TOTAL".to_string(),
        annotation: Annotation::Total,
        cpu_pct,
        summary,
        number: rows.len() as i64,
    }
}

// Splits the tail of the sorted rows beyond top_pct of the grand ptotal into a single synthetic
// OTHERS row, as done on the first tick only.
fn collapse_tail(rows: Vec<GroupRow>, top_pct: f64) -> Vec<GroupRow> {
    if top_pct >= 100.0 || rows.is_empty() {
        return rows;
    }
    let total: Kib = rows.iter().map(|r| r.summary.ptotal).sum();
    if total == 0 {
        return rows;
    }
    let cutoff = (total as f64 * top_pct / 100.0) as Kib;
    let mut kept = vec![];
    let mut tail = vec![];
    let mut cumulative: Kib = 0;
    for row in rows {
        if cumulative < cutoff {
            cumulative += row.summary.ptotal;
            kept.push(row);
        } else {
            tail.push(row);
        }
    }
    if !tail.is_empty() {
        let mut others_summary = Summary::default();
        let mut cpu_pct = 0.0;
        let mut count = 0i64;
        for r in &tail {
            others_summary.pswap += r.summary.pswap;
            others_summary.sh_sysv += r.summary.sh_sysv;
            others_summary.sh_oth += r.summary.sh_oth;
            others_summary.stack += r.summary.stack;
            others_summary.text += r.summary.text;
            others_summary.data += r.summary.data;
            others_summary.ptotal += r.summary.ptotal;
            others_summary.pss += r.summary.pss;
            cpu_pct += r.cpu_pct;
            count += 1;
        }
        kept.push(GroupRow {
            label: "OTHERS".to_string(),
            annotation: Annotation::Overflow,
            cpu_pct,
            summary: others_summary,
            number: count,
        });
    }
    kept
}
