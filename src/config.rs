use crate::core::engine::{DEFAULT_ENGINE, DEFAULT_MIN_VERSION};
use crate::core::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/nftkeeper/settings.json";
pub const DEFAULT_CONFIG_PATH: &str = "config.conf";

/// Overrides `engine` from the settings file
pub const ENGINE_ENV_VAR: &str = "NFTKEEPER_ENGINE";

const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5000;

/// Daemon settings, read once at startup
///
/// Every field has a default so a partial (or absent) settings file works.
/// Command-line flags are applied on top by `main`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DaemonSettings {
    /// Rule engine binary, name or path
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Lowest acceptable engine version
    #[serde(default = "default_min_version")]
    pub min_engine_version: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// JSON-lines audit trail; `null` disables it
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: Option<PathBuf>,
    /// Upper bound on how long the loop waits before rechecking signal flags
    ///
    /// Clamped to 10..=5000 ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Package index refresh; an empty list skips the step
    #[serde(default = "default_package_update")]
    pub package_update: Vec<String>,
    /// Package upgrade, run only after a successful refresh
    #[serde(default = "default_package_upgrade")]
    pub package_upgrade: Vec<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            min_engine_version: default_min_version(),
            snapshot_path: default_snapshot_path(),
            metrics_path: default_metrics_path(),
            pid_file: default_pid_file(),
            audit_log_path: default_audit_log_path(),
            poll_interval_ms: default_poll_interval_ms(),
            package_update: default_package_update(),
            package_upgrade: default_package_upgrade(),
        }
    }
}

impl DaemonSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    /// Rejects settings the daemon cannot run with.
    ///
    /// `main` calls this again after applying command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] naming `path` and the offending field.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.engine.trim().is_empty() {
            return Err(Error::Settings {
                path: path.to_path_buf(),
                message: "engine must not be empty".to_string(),
            });
        }
        if self.min_engine_version.trim().is_empty() {
            return Err(Error::Settings {
                path: path.to_path_buf(),
                message: "min_engine_version must not be empty".to_string(),
            });
        }
        if self.snapshot_path.to_str().is_none() {
            return Err(Error::Settings {
                path: path.to_path_buf(),
                message: format!(
                    "snapshot_path must be valid UTF-8: {}",
                    self.snapshot_path.display()
                ),
            });
        }
        Ok(())
    }
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

fn default_min_version() -> String {
    DEFAULT_MIN_VERSION.to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/nftkeeper/ruleset.backup")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("/var/lib/nftkeeper/metrics.prom")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/run/nftkeeper.pid")
}

#[allow(clippy::unnecessary_wraps)]
fn default_audit_log_path() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/nftkeeper/audit.log"))
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_package_update() -> Vec<String> {
    ["apt-get", "update", "-y"].map(String::from).to_vec()
}

fn default_package_upgrade() -> Vec<String> {
    ["apt-get", "upgrade", "-y"].map(String::from).to_vec()
}

/// Loads settings from `path`, or returns defaults if the file does not exist.
///
/// The `NFTKEEPER_ENGINE` environment variable overrides `engine`.
///
/// # Errors
///
/// Returns [`Error::Settings`] if the file exists but cannot be read, is not
/// valid JSON, or fails validation.
pub fn load_settings(path: &Path) -> Result<DaemonSettings> {
    let mut settings = match std::fs::read_to_string(path) {
        Ok(json) => {
            serde_json::from_str::<DaemonSettings>(&json).map_err(|e| Error::Settings {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonSettings::default(),
        Err(e) => {
            return Err(Error::Settings {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    if let Ok(engine) = std::env::var(ENGINE_ENV_VAR)
        && !engine.trim().is_empty()
    {
        settings.engine = engine;
    }

    settings.validate(path)?;
    Ok(settings)
}
