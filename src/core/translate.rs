//! Rule line → engine argument vector
//!
//! Tokens are split on runs of whitespace and handed to the engine verbatim.
//! There is no quoting grammar and nothing here ever reaches a shell, so a
//! rule line cannot smuggle in a second command.

use crate::core::error::{Error, Result};
use crate::core::rule_file::RuleLine;

/// Explicit argument vector, program name first
pub type Argv = Vec<String>;

/// Upper bound on tokens per rule line
pub const MAX_RULE_TOKENS: usize = 256;

/// Builds `[engine, tok1, tok2, ...]` for one rule line.
///
/// # Errors
///
/// Returns [`Error::TooManyTokens`] if the line has more than
/// [`MAX_RULE_TOKENS`] tokens.
pub fn translate(engine: &str, line: &RuleLine) -> Result<Argv> {
    let tokens: Vec<&str> = line.text.split_whitespace().collect();
    if tokens.len() > MAX_RULE_TOKENS {
        return Err(Error::TooManyTokens {
            line: line.number,
            count: tokens.len(),
            max: MAX_RULE_TOKENS,
        });
    }

    let mut argv = Vec::with_capacity(tokens.len() + 1);
    argv.push(engine.to_string());
    argv.extend(tokens.into_iter().map(String::from));
    Ok(argv)
}

/// Renders an argv for logs and dry-run output.
pub fn command_line(argv: &[String]) -> String {
    argv.join(" ")
}
