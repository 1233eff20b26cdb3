//! Core rule management functionality
//!
//! - [`rule_file`]: Parsing the line-oriented rule file
//! - [`translate`]: Turning one rule line into an argument vector
//! - [`engine`]: Argument vectors for every engine operation, version checks
//! - [`executor`]: Spawning children, dry-run, outcome counters
//! - [`snapshot`]: Backup and restore of the live rule set
//! - [`apply`]: Flush-and-reapply of the rule file
//! - [`error`]: Error types and engine stderr hints

pub mod apply;
pub mod engine;
pub mod error;
pub mod executor;
pub mod rule_file;
pub mod snapshot;
pub mod translate;

#[cfg(test)]
pub mod test_helpers;
