//! Snapshot store: one durable copy of the engine's rule set
//!
//! [`SnapshotStore::backup`] saves the output of the engine dump byte-for-byte,
//! [`SnapshotStore::restore`] replays it at shutdown. There is only ever one
//! snapshot; each backup replaces the previous one.
//!
//! # Write Safety
//!
//! - The containing directory is created with mode 0700 if missing
//! - Content goes to a temp file in the same directory (mode 0600), is synced,
//!   then renamed over the target so a crash never leaves a half-written snapshot

use crate::core::engine::Engine;
use crate::core::error::{Result, SnapshotError};
use crate::core::executor::{Capture, CommandRunner, ExitOutcome, Executor};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Details of a completed backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
}

/// How a restore ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Snapshot loaded into the engine
    Loaded,
    /// No snapshot file existed; the rule set was left flushed
    FlushedOnly,
    /// Dry-run: nothing was run
    DryRun,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    engine: Engine,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, engine: Engine) -> Self {
        Self {
            path: path.into(),
            engine,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps the live rule set to the snapshot path.
    ///
    /// Returns `Ok(None)` under dry-run, where the dump is only echoed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the dump command fails or the file cannot be written.
    pub async fn backup<R: CommandRunner>(
        &self,
        exec: &mut Executor<R>,
    ) -> Result<Option<BackupInfo>> {
        let dump = match exec.capture(&self.engine.dump()).await {
            Capture::DryRun => return Ok(None),
            Capture::Output(bytes) => bytes,
            Capture::Failed(outcome) => {
                return Err(SnapshotError::DumpFailed(outcome.describe()).into());
            }
        };

        write_atomic(&self.path, &dump)?;

        let info = BackupInfo {
            path: self.path.clone(),
            bytes: dump.len(),
            sha256: compute_checksum(&dump),
        };
        info!(
            bytes = info.bytes,
            sha256 = %info.sha256,
            "Snapshot saved to {}",
            self.path.display()
        );
        Ok(Some(info))
    }

    /// Replaces the live rule set with the snapshot.
    ///
    /// The live rules are flushed first so the load does not stack on top of
    /// whatever the last apply left behind. The load itself is a counted
    /// command. A missing snapshot leaves the rule set empty.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the load command fails.
    pub async fn restore<R: CommandRunner>(
        &self,
        exec: &mut Executor<R>,
    ) -> Result<RestoreOutcome> {
        if exec.dry_run() {
            exec.run_untracked(&self.engine.flush()).await;
            exec.execute(&self.engine.load(&self.path)).await;
            return Ok(RestoreOutcome::DryRun);
        }

        let flush = exec.run_untracked(&self.engine.flush()).await;
        if !flush.is_success() {
            warn!("Flush before restore failed: {}", flush.describe());
        }

        if !self.path.is_file() {
            warn!(
                "No snapshot at {}; leaving the rule set empty",
                self.path.display()
            );
            return Ok(RestoreOutcome::FlushedOnly);
        }

        match exec.execute(&self.engine.load(&self.path)).await {
            ExitOutcome::Success => {
                info!("Restored rule set from {}", self.path.display());
                Ok(RestoreOutcome::Loaded)
            }
            failed => Err(SnapshotError::RestoreFailed(failed.describe()).into()),
        }
    }
}

/// Computes the SHA-256 checksum of snapshot bytes as lowercase hex.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Replaces `path` with `contents` through a synced temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    crate::utils::ensure_dir(&dir)?;

    // NamedTempFile is created with mode 0600 on Unix
    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
