//! Filesystem helpers for the daemon's state files
//!
//! # Directory Layout (defaults)
//!
//! - Settings: `/etc/nftkeeper/settings.json`
//! - State: `/var/lib/nftkeeper/` - snapshot, metrics, audit log
//! - PID file: `/run/nftkeeper.pid`

use std::io;
use std::path::Path;

/// Creates `dir` (and parents) with mode 0700 if it does not exist.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new().mode(0o700).recursive(true).create(dir)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

/// Writes the current process id followed by a newline.
///
/// The file is neither locked nor removed on exit.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_dir(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
}
