use std::path::PathBuf;
use thiserror::Error;

/// Core error types for nftkeeper
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rule file could not be read
    #[error("cannot read rule file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file exists but is not valid
    #[error("invalid settings file {}: {message}", path.display())]
    Settings { path: PathBuf, message: String },

    /// Effective uid is not root
    #[error("must run as root (effective uid {euid})")]
    NotRoot { euid: u32 },

    /// Rule engine binary could not be run
    #[error("rule engine '{engine}' is not available: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    /// Rule engine reported a version below the minimum
    #[error("rule engine version too old: found '{found}', need at least {required}")]
    EngineVersion { found: String, required: String },

    /// A rule line split into more tokens than allowed
    #[error("line {line}: {count} tokens exceeds the limit of {max}")]
    TooManyTokens { line: usize, count: usize, max: usize },

    /// Snapshot operation failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Config watch could not be set up
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Snapshot-specific errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("rule set dump failed: {0}")]
    DumpFailed(String),

    #[error("restore failed: {0}")]
    RestoreFailed(String),
}

/// Represents a translated engine error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known nftables stderr patterns, used to annotate failed rule lines.
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an error message against known patterns and returns a readable translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run the daemon as root or grant CAP_NET_ADMIN")
                .with_suggestion("Check for a sandboxing unit option such as PrivateNetwork=");
        }

        if lower.contains("cache initialization failed") {
            return ErrorTranslation::new(
                "Failed to initialize nftables cache - insufficient privileges",
            )
            .with_suggestion("The engine could not talk to the kernel as this user");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("Engine binary or referenced file not found")
                .with_suggestion("Install nftables: apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or: dnf install nftables  (Fedora/RHEL)")
                .with_suggestion("Check include paths used by the rule line");
        }

        if lower.contains("could not process rule") || lower.contains("syntax error") {
            return ErrorTranslation::new("Invalid rule syntax")
                .with_suggestion("Check the rule line for typos")
                .with_suggestion("Test it by hand: nft --check <rule>");
        }

        if (lower.contains("table") && lower.contains("does not exist"))
            || lower.contains("no such table")
        {
            return ErrorTranslation::new("Firewall table does not exist")
                .with_suggestion("Add an 'add table ...' line before rules that use it");
        }

        if lower.contains("chain")
            && (lower.contains("does not exist") || lower.contains("not found"))
        {
            return ErrorTranslation::new("Firewall chain not found")
                .with_suggestion("Add an 'add chain ...' line before rules that use it");
        }

        if lower.contains("resource busy") || lower.contains("device or resource busy") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process may be modifying nftables")
                .with_suggestion(
                    "Check for conflicting firewall managers: systemctl status firewalld ufw",
                );
        }

        if lower.contains("conflict") || lower.contains("already exists") {
            return ErrorTranslation::new("Conflicting firewall rule or table")
                .with_suggestion("A similar object already exists in the live rule set");
        }

        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: modprobe nf_tables");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: nft list ruleset")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
