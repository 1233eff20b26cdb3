//! Flush-and-reapply of the rule file
//!
//! An apply pass flushes the live rule set, then runs each retained line as
//! its own engine command. A failing line never stops the pass. Between lines
//! the caller's termination predicate is checked so shutdown can interrupt a
//! long file at a line boundary.

use crate::core::engine::Engine;
use crate::core::error::NftablesErrorPattern;
use crate::core::executor::{CommandRunner, Counters, Executor};
use crate::core::rule_file::RuleFile;
use crate::core::translate::command_line;
use serde::Serialize;
use tracing::{info, warn};

/// Summary of one apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Commands spawned (or echoed under dry-run) for rule lines
    pub executed: usize,
    /// Physical line numbers whose command failed or was rejected
    pub failed_lines: Vec<usize>,
    /// Stopped early because termination was requested
    pub interrupted: bool,
    /// Cumulative counters after the pass
    pub totals: Counters,
}

/// Flushes the rule set and executes every line of `rules` in order.
pub async fn apply<R, F>(
    exec: &mut Executor<R>,
    engine: &Engine,
    rules: &RuleFile,
    should_stop: F,
) -> ApplyReport
where
    R: CommandRunner,
    F: Fn() -> bool,
{
    let mut report = ApplyReport::default();

    let flush = exec.run_untracked(&engine.flush()).await;
    if !flush.is_success() {
        warn!("Flush failed, applying on top of the current rule set: {}", flush.describe());
    }

    for line in &rules.lines {
        if should_stop() {
            info!(line = line.number, "Termination requested, stopping apply");
            report.interrupted = true;
            break;
        }

        let argv = match engine.rule(line) {
            Ok(argv) => argv,
            Err(e) => {
                warn!(line = line.number, "Rejected: {e}");
                exec.record_rejected();
                report.failed_lines.push(line.number);
                continue;
            }
        };

        info!(line = line.number, "{}", command_line(&argv));
        let outcome = exec.execute(&argv).await;
        report.executed += 1;

        if !outcome.is_success() {
            let hint = NftablesErrorPattern::match_error(outcome.stderr().unwrap_or_default());
            warn!(
                "line {} failed: {} ({})",
                line.number,
                command_line(&argv),
                hint.user_message
            );
            for suggestion in &hint.suggestions {
                info!(line = line.number, "hint: {suggestion}");
            }
            report.failed_lines.push(line.number);
        }
    }

    report.totals = exec.counters();
    report
}
