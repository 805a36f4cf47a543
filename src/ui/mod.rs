//! Terminal output for the CLI: run progress and summary tables.

use comfy_table::{Attribute, Cell, Table};
use std::time::Duration;

use crate::models::{RunReport, TrialRecord};
use crate::pipeline::Progress;

/// Status icons for run output.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
}

/// Truncate text to `max_len` characters, ending with `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Format a count with thousands separators.
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress bar over the products of a run
pub struct HarvestProgress {
    pb: indicatif::ProgressBar,
}

impl HarvestProgress {
    /// Create a bar for `total` products; hidden when `quiet` is set
    pub fn new(total: usize, quiet: bool) -> Self {
        let pb = if quiet {
            indicatif::ProgressBar::hidden()
        } else {
            indicatif::ProgressBar::new(total as u64)
        };
        let style = indicatif::ProgressStyle::with_template(
            "{spinner:.cyan} {msg}\n{wide_bar:.cyan/blue} {pos}/{len} ({elapsed})",
        )
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .progress_chars("█▓▒░ ");
        pb.set_style(style);
        pb.set_message("Harvesting trials");
        pb.enable_steady_tick(Duration::from_millis(120));

        Self { pb }
    }

    /// Set the group currently being processed
    pub fn set_group(&self, name: &str) {
        self.pb.set_message(format!("Harvesting trials ({})", name));
    }

    /// Record one finished product
    pub fn update(&self, progress: &Progress) {
        self.pb.inc(1);
        if !progress.succeeded {
            self.pb.println(format!(
                "{} product {} failed",
                status_icon(Status::Error),
                progress.product_id
            ));
        }
    }

    pub fn finish(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}

/// Per-product summary of a run
pub fn summary_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["", "Product ID", "Product", "Trials", "Notes"]);

    for result in &report.results {
        let mut notes = Vec::new();
        if !result.variant_failures.is_empty() {
            notes.push(format!("{} variant(s) failed", result.variant_failures.len()));
        }
        if result.truncated {
            notes.push("truncated".to_string());
        }
        let icon = if notes.is_empty() {
            status_icon(Status::Success)
        } else {
            status_icon(Status::Warning)
        };
        table.add_row(vec![
            Cell::new(icon),
            Cell::new(result.product_id.as_str()),
            Cell::new(truncate_with_ellipsis(&result.product_name, 40)).add_attribute(Attribute::Bold),
            Cell::new(format_number(result.len())),
            Cell::new(notes.join("; ")),
        ]);
    }

    for failure in &report.failures {
        table.add_row(vec![
            Cell::new(status_icon(Status::Error)),
            Cell::new(failure.product_id.as_str()),
            Cell::new(truncate_with_ellipsis(&failure.product_name, 40)),
            Cell::new("-"),
            Cell::new(truncate_with_ellipsis(&failure.reason, 60)),
        ]);
    }

    table
}

/// Trials resolved for a single query
pub fn trials_table(trials: &[TrialRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["NCT", "Sponsor", "Status", "Phase", "Countries"]);

    for trial in trials {
        table.add_row(vec![
            Cell::new(&trial.nct_number).add_attribute(Attribute::Bold),
            Cell::new(truncate_with_ellipsis(&trial.sponsor, 30)),
            Cell::new(trial.status.label()),
            Cell::new(&trial.phase),
            Cell::new(truncate_with_ellipsis(&trial.countries().join(", "), 50)),
        ]);
    }

    table
}
