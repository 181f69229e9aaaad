// ReportFormatter: a pure projection from a Report to an ordered, annotated text table.
// Never touches /proc; takes only what SamplingLoop produced.

use crate::config::Units;
use crate::sampling::{Annotation, GroupRow, Report};
use crate::types::Kib;

const KB_WIDTH: usize = 11;
const MB_WIDTH: usize = 8;

pub struct ReportFormatter {
    pub units: Units,
    pub collapse_other: bool,
    pub show_cpu: bool,
    pub debug: bool,
}

impl ReportFormatter {
    pub fn new(units: Units, collapse_other: bool, show_cpu: bool, debug: bool) -> ReportFormatter {
        ReportFormatter {
            units,
            collapse_other,
            show_cpu,
            debug,
        }
    }

    pub fn render(&self, report: &Report) -> String {
        let mut out = String::new();
        out.push_str(&self.leader_line(report));
        out.push('\n');
        out.push_str(&self.header_line());
        out.push('\n');
        out.push_str(&self.row_line(&report.grand_total));
        out.push('\n');
        for row in &report.rows {
            out.push_str(&self.row_line(row));
            out.push('\n');
        }
        out
    }

    fn leader_line(&self, report: &Report) -> String {
        let zram = match &report.facts.zram {
            Some(z) => format!(", zram {}/{} kB ({:.1}x)", z.compressed_kb, z.raw_kb, z.ratio),
            None => String::new(),
        };
        format!(
            "t={} mem_total={}kB mem_avail={}kB pids={}/{}{}",
            report.timestamp_secs,
            report.facts.mem_total_kb,
            report.facts.mem_avail_kb,
            report.pids_qualified,
            report.pids_total_non_kernel,
            zram
        )
    }

    fn header_line(&self) -> String {
        let mut cols = vec![];
        if self.show_cpu {
            cols.push(pad("cpu%", MB_WIDTH));
        }
        cols.push(pad("pswap", self.col_width()));
        if self.collapse_other {
            cols.push(pad("other", self.col_width()));
        } else {
            cols.push(pad("shSYSV", self.col_width()));
            cols.push(pad("shOth", self.col_width()));
            cols.push(pad("stack", self.col_width()));
            cols.push(pad("text", self.col_width()));
        }
        cols.push(pad("data", self.col_width()));
        cols.push(pad("ptotal", self.col_width()));
        if self.debug {
            cols.push(pad("pss", self.col_width()));
        }
        cols.push("  ".to_string());
        cols.push("info".to_string());
        cols.join(" ")
    }

    fn row_line(&self, row: &GroupRow) -> String {
        let mut cols = vec![];
        if self.show_cpu {
            cols.push(pad(&format!("{:.1}", row.cpu_pct), MB_WIDTH));
        }
        cols.push(self.num(row.summary.pswap));
        if self.collapse_other {
            let other = row.summary.sh_sysv + row.summary.sh_oth + row.summary.stack + row.summary.text;
            cols.push(self.num(other));
        } else {
            cols.push(self.num(row.summary.sh_sysv));
            cols.push(self.num(row.summary.sh_oth));
            cols.push(self.num(row.summary.stack));
            cols.push(self.num(row.summary.text));
        }
        cols.push(self.num(row.summary.data));
        cols.push(self.num(row.summary.ptotal));
        if self.debug {
            cols.push(self.num(row.summary.pss));
        }
        cols.push(pad(&annotation_str(row.annotation), 6));
        cols.push(row.label.clone());
        cols.join(" ")
    }

    fn col_width(&self) -> usize {
        match self.units {
            Units::Kb => KB_WIDTH,
            _ => MB_WIDTH,
        }
    }

    fn num(&self, kb: Kib) -> String {
        pad(&format_value(kb, self.units), self.col_width())
    }
}

fn annotation_str(a: Annotation) -> String {
    match a {
        Annotation::Total => "T".to_string(),
        Annotation::Appeared => "A".to_string(),
        Annotation::Overflow => "O".to_string(),
        Annotation::Gone => "x".to_string(),
        Annotation::Delta(d) => format!("{d:+}K"),
        Annotation::None => String::new(),
    }
}

fn pad(s: &str, width: usize) -> String {
    format!("{s:>width$}")
}

fn format_value(kb: Kib, units: Units) -> String {
    match units {
        Units::Kb => kb.to_string(),
        Units::Mb => format!("{:.1}", kb as f64 / 1000.0),
        Units::MebiB => format!("{:.1}", kb as f64 / 1024.0),
        Units::Human => format_human(kb),
    }
}

// Largest of {K, M, G} that keeps the mantissa in [1, 1024), one decimal place.
fn format_human(kb: Kib) -> String {
    let mut value = kb as f64;
    let mut unit = "K";
    if value >= 1024.0 {
        value /= 1024.0;
        unit = "M";
    }
    if value >= 1024.0 {
        value /= 1024.0;
        unit = "G";
    }
    format!("{value:.1}{unit}")
}
