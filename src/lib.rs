//! nftkeeper - nftables rule-file keeper
//!
//! A small root daemon that keeps the kernel rule set in sync with a plain
//! text rule file, one `nft` sub-command per line.
//!
//! # Architecture
//!
//! - [`core`] - Rule file parsing, engine commands, execution, snapshots, apply
//! - [`daemon`] - Startup checks, reload triggers, the apply loop and restore
//! - [`audit`] - JSON-lines audit trail of every rule set change
//! - [`metrics`] - Counter exposition written at shutdown
//! - [`config`] - Daemon settings file
//! - [`privilege`] - Root and engine binary checks
//! - [`utils`] - State directory and PID file helpers
//!
//! # Safety Features
//!
//! - Snapshot of the live rule set before the first apply, restored on exit
//! - Atomic snapshot and metrics writes with 0600 permissions
//! - Commands spawned from explicit argument vectors, never through a shell
//! - Dry-run mode that spawns nothing at all

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod daemon;
pub mod metrics;
pub mod privilege;
pub mod utils;

// Re-export commonly used types
pub use crate::core::error::{Error, Result};
pub use crate::core::executor::{CommandRunner, Counters, SystemRunner};
pub use crate::daemon::{DaemonContext, RunOptions, RunSummary};
