//! Child process execution and outcome accounting
//!
//! All engine and package-manager invocations go through [`Executor`]. It owns
//! the cumulative `applied`/`failed` counters and is the single place where
//! dry-run turns a command into a printed preview.
//!
//! # Counting
//!
//! - [`Executor::execute`] counts exactly once per call (rule lines, snapshot load).
//! - [`Executor::run_untracked`] and [`Executor::capture`] never count
//!   (flush, version probe, dump, package update).
//!
//! Under dry-run none of the three spawns anything and the counters stay at zero.

use crate::core::translate::command_line;
use serde::Serialize;
use std::io::{self, Write};
use std::process::{ExitStatus, Output, Stdio};
use tracing::{debug, warn};

/// Cumulative rule outcome counters for the process lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub applied: u64,
    pub failed: u64,
}

/// Classified result of one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Exited normally with a non-zero status
    Exited { code: i32, stderr: String },
    /// Terminated by a signal
    Signaled { signal: Option<i32>, stderr: String },
    /// Could not be started at all
    SpawnFailed { reason: String },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Classifies a finished child's status.
    pub fn from_status(status: ExitStatus, stderr: &[u8]) -> Self {
        use std::os::unix::process::ExitStatusExt;

        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        match status.code() {
            Some(0) => Self::Success,
            Some(code) => Self::Exited { code, stderr },
            None => Self::Signaled {
                signal: status.signal(),
                stderr,
            },
        }
    }

    /// Captured stderr, if the child ran.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Exited { stderr, .. } | Self::Signaled { stderr, .. } => Some(stderr),
            Self::Success | Self::SpawnFailed { .. } => None,
        }
    }

    /// Short human-readable reason for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "success".to_string(),
            Self::Exited { code, .. } => format!("exit status {code}"),
            Self::Signaled {
                signal: Some(sig), ..
            } => format!("killed by signal {sig}"),
            Self::Signaled { signal: None, .. } => "killed by signal".to_string(),
            Self::SpawnFailed { reason } => format!("failed to start: {reason}"),
        }
    }
}

/// Result of [`Executor::capture`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Dry-run: the command was only echoed
    DryRun,
    /// Exit status 0 with this stdout
    Output(Vec<u8>),
    Failed(ExitOutcome),
}

/// Spawns child processes.
///
/// Implementations must never go through a shell: `argv[0]` is the program and
/// the remaining elements are passed as-is.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs `argv` to completion with stdin closed, capturing stdout and stderr.
    async fn output(&self, argv: &[String]) -> io::Result<Output>;
}

/// Production runner on `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn output(&self, argv: &[String]) -> io::Result<Output> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"))?;

        // kill_on_drop stays false: a started child always runs to completion
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }
}

pub struct Executor<R> {
    runner: R,
    dry_run: bool,
    sink: Box<dyn Write>,
    counters: Counters,
}

impl<R: CommandRunner> Executor<R> {
    /// Creates an executor whose dry-run preview goes to stdout.
    pub fn new(runner: R, dry_run: bool) -> Self {
        Self {
            runner,
            dry_run,
            sink: Box::new(io::stdout()),
            counters: Counters::default(),
        }
    }

    /// Redirects dry-run previews.
    pub fn with_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.sink = sink;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Runs a counted command.
    pub async fn execute(&mut self, argv: &[String]) -> ExitOutcome {
        if self.dry_run {
            self.echo(argv);
            return ExitOutcome::Success;
        }

        let outcome = self.spawn(argv).await;
        if outcome.is_success() {
            self.counters.applied += 1;
        } else {
            self.counters.failed += 1;
        }
        outcome
    }

    /// Runs a command whose outcome must not affect the counters.
    pub async fn run_untracked(&mut self, argv: &[String]) -> ExitOutcome {
        if self.dry_run {
            self.echo(argv);
            return ExitOutcome::Success;
        }
        self.spawn(argv).await
    }

    /// Runs an uncounted command and returns its stdout on success.
    pub async fn capture(&mut self, argv: &[String]) -> Capture {
        if self.dry_run {
            self.echo(argv);
            return Capture::DryRun;
        }

        match self.runner.output(argv).await {
            Ok(output) => match ExitOutcome::from_status(output.status, &output.stderr) {
                ExitOutcome::Success => Capture::Output(output.stdout),
                failed => {
                    warn!("`{}` failed: {}", command_line(argv), failed.describe());
                    Capture::Failed(failed)
                }
            },
            Err(e) => {
                warn!("Failed to spawn `{}`: {e}", command_line(argv));
                Capture::Failed(ExitOutcome::SpawnFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Counts a rule line that was rejected before anything was spawned.
    pub fn record_rejected(&mut self) {
        if !self.dry_run {
            self.counters.failed += 1;
        }
    }

    async fn spawn(&mut self, argv: &[String]) -> ExitOutcome {
        debug!("Running `{}`", command_line(argv));
        let outcome = match self.runner.output(argv).await {
            Ok(output) => ExitOutcome::from_status(output.status, &output.stderr),
            Err(e) => ExitOutcome::SpawnFailed {
                reason: e.to_string(),
            },
        };

        if !outcome.is_success() {
            warn!("`{}` failed: {}", command_line(argv), outcome.describe());
            if let Some(stderr) = outcome.stderr() {
                for message in parse_engine_errors(stderr) {
                    warn!("  {message}");
                }
            }
        }
        outcome
    }

    fn echo(&mut self, argv: &[String]) {
        // A broken preview sink must not turn into a failed command
        let _ = writeln!(self.sink, "[DRY] {}", command_line(argv));
        let _ = self.sink.flush();
    }
}

/// Parses engine stderr into readable messages
///
/// Understands nft's JSON error object (`{"errors":[{"message":...}]}`) and
/// falls back to one message per non-empty line with the usual prefixes removed.
pub fn parse_engine_errors(stderr: &str) -> Vec<String> {
    if let Ok(json_err) = serde_json::from_str::<serde_json::Value>(stderr)
        && let Some(errors) = json_err.get("errors").and_then(|e| e.as_array())
    {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
    }

    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}
