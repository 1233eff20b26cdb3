//! Privilege and prerequisite checks
//!
//! nftkeeper never elevates itself. It must already be running with an
//! effective uid of 0, because every engine call modifies the kernel rule set.
//! These checks run before anything is mutated.
//!
//! # Security
//!
//! - Commands are always spawned from explicit argument vectors, never via a shell
//! - The engine binary is resolved through `PATH` only for diagnostics; the
//!   spawn itself uses the name exactly as configured

use crate::core::error::{Error, Result};
use std::path::Path;

/// Returns the effective uid of this process.
pub fn effective_uid() -> u32 {
    nix::unistd::geteuid().as_raw()
}

/// Fails unless the effective uid is root.
///
/// # Errors
///
/// Returns [`Error::NotRoot`] carrying the actual effective uid.
pub fn require_root() -> Result<()> {
    match effective_uid() {
        0 => Ok(()),
        euid => Err(Error::NotRoot { euid }),
    }
}

/// Checks if a binary exists
///
/// Names containing a `/` are checked as paths; bare names are searched in `PATH`.
///
/// # Arguments
///
/// * `name` - Binary name or path (e.g., "nft", "/usr/sbin/nft")
pub fn binary_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}
