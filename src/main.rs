//! nftkeeper - keeps the nftables rule set in sync with a rule file
//!
//! # Usage
//!
//! ```bash
//! # Apply config.conf, re-apply on change or SIGHUP, restore on SIGTERM
//! nftkeeper -c /etc/nftkeeper/config.conf
//!
//! # Print what would run without touching anything
//! nftkeeper -c config.conf --dry-run --once
//!
//! # Dump the live rule set and exit
//! nftkeeper --status
//! ```
//!
//! # Signals
//!
//! - `SIGHUP`: re-read and re-apply the rule file
//! - `SIGTERM`, `SIGINT`, `SIGQUIT`: stop after the current line, restore, exit

use clap::Parser;
use nftkeeper::config::{self, DEFAULT_CONFIG_PATH, DEFAULT_SETTINGS_PATH};
use nftkeeper::core::error::NftablesErrorPattern;
use nftkeeper::daemon::{self, DaemonContext, RunOptions, triggers::ReloadSignal};
use nftkeeper::{Error, SystemRunner, privilege};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nftkeeper", version)]
#[command(about = "Keep the nftables rule set in sync with a rule file", long_about = None)]
struct Cli {
    /// Rule file, one nft sub-command per line
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Print commands instead of running them
    #[arg(short, long)]
    dry_run: bool,
    /// Run the package update before backing up
    #[arg(short, long)]
    update: bool,
    /// Log to this file instead of stderr
    #[arg(short, long, value_name = "FILE")]
    log_file: Option<PathBuf>,
    /// Print the live rule set and exit
    #[arg(long)]
    status: bool,
    /// Apply once, restore the snapshot and exit
    #[arg(long)]
    once: bool,
    /// Daemon settings (JSON)
    #[arg(long, value_name = "FILE", default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,
    #[arg(long, value_name = "FILE")]
    pid_file: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    metrics: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref(), cli.dry_run);

    if let Err(e) = privilege::require_root() {
        return fatal(&e);
    }

    let mut settings = match config::load_settings(&cli.settings) {
        Ok(settings) => settings,
        Err(e) => return fatal(&e),
    };
    if let Some(path) = cli.pid_file {
        settings.pid_file = path;
    }
    if let Some(path) = cli.snapshot {
        settings.snapshot_path = path;
    }
    if let Some(path) = cli.metrics {
        settings.metrics_path = path;
    }
    if let Err(e) = settings.validate(&cli.settings) {
        return fatal(&e);
    }

    let options = RunOptions {
        config_path: cli.config,
        dry_run: cli.dry_run,
        update: cli.update,
        once: cli.once,
    };

    // All engine work happens on one thread
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return fatal(&Error::Io(e)),
    };

    let mut ctx = DaemonContext::new(settings, options, SystemRunner);

    if cli.status {
        let mut stdout = std::io::stdout().lock();
        return match runtime.block_on(ctx.status(&mut stdout)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fatal(&e),
        };
    }

    let signal = ReloadSignal::new();
    if let Err(e) = signal.register_os_handlers() {
        return fatal(&Error::Io(e));
    }

    info!(
        "nftkeeper {} starting (pid {}, config {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        ctx.options().config_path.display()
    );

    match runtime.block_on(daemon::run(&mut ctx, &signal)) {
        Ok(summary) => {
            if !summary.restore_ok {
                warn!("Rule set may not match the pre-start snapshot");
            }
            ExitCode::from(summary.exit_code())
        }
        Err(e) => fatal(&e),
    }
}

fn fatal(err: &Error) -> ExitCode {
    error!("{err}");
    if let Error::EngineUnavailable { reason, .. } = err {
        let hint = NftablesErrorPattern::match_error(reason);
        for suggestion in &hint.suggestions {
            info!("hint: {suggestion}");
        }
    }
    eprintln!("Error: {err}");
    ExitCode::FAILURE
}

fn init_logging(log_file: Option<&Path>, dry_run: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
        return;
    };

    let mut open = std::fs::OpenOptions::new();
    open.create(true);
    if dry_run {
        open.write(true).truncate(true);
    } else {
        open.append(true);
    }

    match open.open(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
            warn!(
                "Cannot open log file {}: {e}, logging to stderr",
                path.display()
            );
        }
    }
}
