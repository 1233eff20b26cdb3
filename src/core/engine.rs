//! Argument vectors for the external rule engine
//!
//! Every operation the daemon asks of the engine is built here, so the rest of
//! the crate never assembles engine command lines by hand.

use crate::core::error::Result;
use crate::core::rule_file::RuleLine;
use crate::core::translate::{self, Argv};
use std::path::Path;

/// Default engine binary
pub const DEFAULT_ENGINE: &str = "nft";

/// Oldest nft release whose `list ruleset` output reloads cleanly with `-f`
pub const DEFAULT_MIN_VERSION: &str = "0.9.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    binary: String,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE)
    }
}

impl Engine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn version(&self) -> Argv {
        self.argv(&["--version"])
    }

    pub fn flush(&self) -> Argv {
        self.argv(&["flush", "ruleset"])
    }

    pub fn dump(&self) -> Argv {
        self.argv(&["list", "ruleset"])
    }

    /// `path` is expected to be UTF-8; settings validation rejects anything else.
    pub fn load(&self, path: &Path) -> Argv {
        vec![
            self.binary.clone(),
            "-f".to_string(),
            path.to_string_lossy().into_owned(),
        ]
    }

    /// Translates one rule line into an engine invocation.
    ///
    /// # Errors
    ///
    /// See [`translate::translate`].
    pub fn rule(&self, line: &RuleLine) -> Result<Argv> {
        translate::translate(&self.binary, line)
    }

    fn argv(&self, args: &[&str]) -> Argv {
        std::iter::once(self.binary.as_str())
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }
}

/// Parses `1.0.6`, `v1.0.6` or `1.0` into numeric components.
fn parse_version(token: &str) -> Option<Vec<u64>> {
    let token = token.trim_start_matches('v');
    let parts: Option<Vec<u64>> = token.split('.').map(|p| p.parse().ok()).collect();
    parts.filter(|p| p.len() >= 2)
}

/// Checks the engine's `--version` output against a minimum version.
///
/// The first dotted-number token (`nftables v1.0.6 (Lester Gooch #5)` →
/// `1.0.6`) is compared numerically. When either side has no such token the
/// check falls back to the output containing `minimum` verbatim.
pub fn version_satisfies(output: &str, minimum: &str) -> bool {
    let found = output.split_whitespace().find_map(parse_version);
    match (found, parse_version(minimum)) {
        (Some(mut found), Some(mut required)) => {
            let width = found.len().max(required.len());
            found.resize(width, 0);
            required.resize(width, 0);
            found >= required
        }
        _ => output.contains(minimum),
    }
}
