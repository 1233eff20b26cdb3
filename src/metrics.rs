//! Plain-text metrics exposition
//!
//! The two cumulative counters are written once at shutdown in the
//! Prometheus text format, suitable for the node exporter's textfile
//! collector.

use crate::core::executor::Counters;
use std::fmt::Write as _;
use std::path::Path;

pub const APPLIED_METRIC: &str = "nftkeeper_rules_applied_total";
pub const FAILED_METRIC: &str = "nftkeeper_rules_failed_total";

/// Renders the counters as two labeled counter samples.
pub fn render(counters: Counters) -> String {
    let mut out = String::new();
    let samples = [
        (
            APPLIED_METRIC,
            "Engine commands that exited successfully.",
            counters.applied,
        ),
        (
            FAILED_METRIC,
            "Engine commands that failed or were rejected.",
            counters.failed,
        ),
    ];
    for (name, help, value) in samples {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }
    out
}

/// Atomically replaces `path` with the rendered counters.
///
/// # Errors
///
/// Returns `Err` if the directory or file cannot be written.
pub fn write_metrics(path: &Path, counters: Counters) -> std::io::Result<()> {
    crate::core::snapshot::write_atomic(path, render(counters).as_bytes())
}
