//! Lifecycle controller
//!
//! Startup checks, the backup, the apply/watch loop and the final restore.
//! Everything that mutates the kernel rule set runs on the single task that
//! drives [`run`]; signal handlers and the file watcher only raise flags or
//! queue events for it.
//!
//! # Startup Order
//!
//! 1. Engine version probe (fatal)
//! 2. Rule file read (fatal)
//! 3. Optional package update (best-effort)
//! 4. PID file (best-effort, skipped under dry-run)
//! 5. Snapshot backup (best-effort)
//! 6. Apply loop, until a terminate signal
//! 7. Restore, exactly once

pub mod triggers;

use crate::audit::{self, AuditLog, EventType};
use crate::config::DaemonSettings;
use crate::core::apply::apply;
use crate::core::engine::{Engine, version_satisfies};
use crate::core::error::{Error, Result, SnapshotError};
use crate::core::executor::{Capture, CommandRunner, Counters, Executor};
use crate::core::rule_file::RuleFile;
use crate::core::snapshot::{RestoreOutcome, SnapshotStore};
use crate::core::translate::command_line;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};
use triggers::{ConfigWatcher, ReloadSignal, Trigger, TriggerSet};

/// Per-invocation options from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub dry_run: bool,
    /// Run the package update before the backup
    pub update: bool,
    /// Apply once, restore, exit
    pub once: bool,
}

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: Counters,
    /// Apply passes that actually ran
    pub applies: usize,
    pub backup_ok: bool,
    pub restore_ok: bool,
}

impl RunSummary {
    /// 0 if no counted command failed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.counters.failed != 0)
    }
}

/// All state the controller owns for one run
pub struct DaemonContext<R> {
    settings: DaemonSettings,
    options: RunOptions,
    engine: Engine,
    executor: Executor<R>,
    snapshots: SnapshotStore,
    audit: Option<AuditLog>,
}

impl<R: CommandRunner> DaemonContext<R> {
    pub fn new(settings: DaemonSettings, options: RunOptions, runner: R) -> Self {
        let engine = Engine::new(settings.engine.clone());
        let executor = Executor::new(runner, options.dry_run);
        let snapshots = SnapshotStore::new(settings.snapshot_path.clone(), engine.clone());
        let audit = if options.dry_run {
            None
        } else {
            settings.audit_log_path.clone().map(AuditLog::new)
        };

        Self {
            settings,
            options,
            engine,
            executor,
            snapshots,
            audit,
        }
    }

    /// Sends `[DRY]` previews to `sink` instead of stdout.
    pub fn with_dry_run_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.executor = self.executor.with_sink(sink);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn counters(&self) -> Counters {
        self.executor.counters()
    }

    /// Verifies the engine runs and is recent enough.
    ///
    /// Under dry-run the probe is only echoed and always passes.
    ///
    /// # Errors
    ///
    /// [`Error::EngineUnavailable`] if the probe cannot run or fails,
    /// [`Error::EngineVersion`] if the reported version is too old.
    pub async fn check_engine(&mut self) -> Result<()> {
        let minimum = self.settings.min_engine_version.clone();
        match self.executor.capture(&self.engine.version()).await {
            Capture::DryRun => Ok(()),
            Capture::Output(stdout) => {
                let reported = String::from_utf8_lossy(&stdout).trim().to_string();
                if version_satisfies(&reported, &minimum) {
                    info!("Using {reported}");
                    Ok(())
                } else {
                    Err(Error::EngineVersion {
                        found: reported,
                        required: minimum,
                    })
                }
            }
            Capture::Failed(outcome) => {
                let binary = self.engine.binary().to_string();
                let reason = if crate::privilege::binary_exists(&binary) {
                    outcome.describe()
                } else {
                    format!("{binary} not found")
                };
                Err(Error::EngineUnavailable {
                    engine: binary,
                    reason,
                })
            }
        }
    }

    /// Refreshes the package index, then upgrades if the refresh succeeded.
    ///
    /// Failures are logged and never counted.
    pub async fn update_packages(&mut self) {
        let update = self.settings.package_update.clone();
        let upgrade = self.settings.package_upgrade.clone();
        if update.is_empty() {
            info!("No package update command configured, skipping");
            return;
        }

        info!("Updating packages: {}", command_line(&update));
        let outcome = self.executor.run_untracked(&update).await;
        if !outcome.is_success() {
            warn!("Package update failed ({}), skipping upgrade", outcome.describe());
            return;
        }

        if upgrade.is_empty() {
            return;
        }
        let outcome = self.executor.run_untracked(&upgrade).await;
        if !outcome.is_success() {
            warn!("Package upgrade failed: {}", outcome.describe());
        }
    }

    /// Writes the live rule set to `out`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the dump fails or `out` cannot be written.
    pub async fn status(&mut self, out: &mut dyn Write) -> Result<()> {
        match self.executor.capture(&self.engine.dump()).await {
            Capture::DryRun => Ok(()),
            Capture::Output(stdout) => {
                out.write_all(&stdout)?;
                out.flush()?;
                Ok(())
            }
            Capture::Failed(outcome) => Err(SnapshotError::DumpFailed(outcome.describe()).into()),
        }
    }

    async fn record(&self, event: EventType, success: bool, details: serde_json::Value) {
        audit::record(self.audit.as_ref(), event, success, details, None).await;
    }

    async fn record_error(&self, event: EventType, details: serde_json::Value, err: &Error) {
        audit::record(
            self.audit.as_ref(),
            event,
            false,
            details,
            Some(err.to_string()),
        )
        .await;
    }

    async fn backup(&mut self) -> bool {
        match self.snapshots.backup(&mut self.executor).await {
            Ok(Some(info)) => {
                self.record(
                    EventType::Backup,
                    true,
                    serde_json::json!({
                        "path": info.path.display().to_string(),
                        "bytes": info.bytes,
                        "sha256": info.sha256,
                    }),
                )
                .await;
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Backup failed, shutdown restore may be incomplete: {e}");
                self.record_error(
                    EventType::Backup,
                    serde_json::json!({ "path": self.snapshots.path().display().to_string() }),
                    &e,
                )
                .await;
                false
            }
        }
    }

    async fn restore(&mut self) -> bool {
        let details = serde_json::json!({ "path": self.snapshots.path().display().to_string() });
        match self.snapshots.restore(&mut self.executor).await {
            Ok(outcome) => {
                if outcome != RestoreOutcome::DryRun {
                    self.record(EventType::RestoreSnapshot, true, details).await;
                }
                true
            }
            Err(e) => {
                error!("Restore failed: {e}");
                self.record_error(EventType::RestoreSnapshot, details, &e).await;
                false
            }
        }
    }

    async fn apply_rules(&mut self, trigger: Trigger, rules: &RuleFile, signal: &ReloadSignal) {
        info!(
            "Applying {} rules from {} ({})",
            rules.len(),
            self.options.config_path.display(),
            trigger.as_str()
        );
        let report = apply(&mut self.executor, &self.engine, rules, || {
            signal.terminate_requested()
        })
        .await;

        info!(
            executed = report.executed,
            failed = report.failed_lines.len(),
            interrupted = report.interrupted,
            "Apply finished (applied={}, failed={})",
            report.totals.applied,
            report.totals.failed
        );
        self.record(
            EventType::ApplyRules,
            report.failed_lines.is_empty(),
            serde_json::json!({
                "trigger": trigger.as_str(),
                "report": report,
            }),
        )
        .await;
    }

    fn write_metrics(&self) {
        let counters = self.executor.counters();
        if self.options.dry_run {
            info!(
                "Dry run: metrics not written (applied={}, failed={})",
                counters.applied, counters.failed
            );
            return;
        }
        if let Err(e) = crate::metrics::write_metrics(&self.settings.metrics_path, counters) {
            warn!(
                "Failed to write metrics to {}: {e}",
                self.settings.metrics_path.display()
            );
        }
    }
}

/// Runs the daemon until a terminate signal (or one apply with `once`).
///
/// # Errors
///
/// Only startup failures are returned: the engine check and the first read of
/// the rule file. Once the backup has been attempted the run always ends with
/// a restore and returns a summary.
pub async fn run<R: CommandRunner>(
    ctx: &mut DaemonContext<R>,
    signal: &ReloadSignal,
) -> Result<RunSummary> {
    ctx.check_engine().await?;

    let config_path = ctx.options.config_path.clone();
    let readable = RuleFile::load(&config_path).await?;
    info!(
        "Loaded {} rule lines from {}",
        readable.len(),
        config_path.display()
    );
    if ctx.options.update {
        ctx.update_packages().await;
    }

    if !ctx.options.dry_run
        && let Err(e) = crate::utils::write_pid_file(&ctx.settings.pid_file)
    {
        warn!(
            "Failed to write PID file {}: {e}",
            ctx.settings.pid_file.display()
        );
    }

    ctx.record(
        EventType::Startup,
        true,
        serde_json::json!({
            "pid": std::process::id(),
            "config": config_path.display().to_string(),
            "engine": ctx.engine.binary(),
        }),
    )
    .await;

    let backup_ok = ctx.backup().await;

    let mut watcher = if ctx.options.once {
        None
    } else {
        match ConfigWatcher::new(&config_path) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("Config watch unavailable, reload on SIGHUP only: {e}");
                None
            }
        }
    };

    let poll = ctx.settings.poll_interval();
    let mut triggers = TriggerSet::new();
    let mut applies = 0;

    loop {
        if signal.terminate_requested() {
            info!("Termination requested");
            triggers.drain();
            break;
        }

        if signal.take_reload() && triggers.request(Trigger::Signal) {
            info!("Reload requested by signal");
        }

        if let Some(w) = watcher.as_mut()
            && w.take_pending()
            && triggers.request(Trigger::FileChange)
        {
            info!("{} changed", w.target().display());
        }

        if let Some(trigger) = triggers.begin_apply() {
            match RuleFile::load(&config_path).await {
                Ok(rules) => {
                    ctx.apply_rules(trigger, &rules, signal).await;
                    applies += 1;
                }
                Err(e) => error!("Reload skipped, live rules left unchanged: {e}"),
            }
            triggers.finish_apply();

            if ctx.options.once {
                triggers.drain();
                break;
            }
            continue;
        }

        match watcher.as_mut() {
            Some(w) => {
                if w.next_change(poll).await && triggers.request(Trigger::FileChange) {
                    info!("{} changed", w.target().display());
                }
            }
            None => tokio::time::sleep(poll).await,
        }
    }

    drop(watcher);
    if !backup_ok {
        warn!(
            "Startup backup failed; {} may not hold the pre-start rule set",
            ctx.snapshots.path().display()
        );
    }
    let restore_ok = ctx.restore().await;
    triggers.terminate();

    ctx.write_metrics();
    let counters = ctx.executor.counters();
    ctx.record(
        EventType::Shutdown,
        counters.failed == 0,
        serde_json::json!({
            "counters": counters,
            "applies": applies,
        }),
    )
    .await;
    info!(
        applied = counters.applied,
        failed = counters.failed,
        "Shutdown complete"
    );

    Ok(RunSummary {
        counters,
        applies,
        backup_ok,
        restore_ok,
    })
}
