//! Line-oriented rule file
//!
//! Each non-blank line that does not start with `#` (after leading
//! whitespace) is one engine sub-command. Line numbers are 1-based and refer
//! to the physical line in the file, so diagnostics point at what the
//! operator actually wrote.

use crate::core::error::{Error, Result};
use std::path::Path;

/// One retained rule line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLine {
    /// 1-based physical line number
    pub number: usize,
    /// Trimmed line text, never empty and never a comment
    pub text: String,
}

/// An immutable snapshot of the rule file taken at the start of an apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFile {
    pub lines: Vec<RuleLine>,
}

impl RuleFile {
    /// Parses rule file contents, dropping blanks and comments.
    pub fn parse(contents: &str) -> Self {
        let lines = contents
            .lines()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let text = raw.trim();
                if text.is_empty() || text.starts_with('#') {
                    None
                } else {
                    Some(RuleLine {
                        number: idx + 1,
                        text: text.to_string(),
                    })
                }
            })
            .collect();

        Self { lines }
    }

    /// Reads and parses the rule file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or is not UTF-8.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Config {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&contents))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
