//! Error types for the confvault-poll crate.

use thiserror::Error;

use crate::dns::ZoneError;

/// A failure confined to one host. Logged and skipped; never aborts a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{host}: unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("{host}: {operation} timed out")]
    Timeout { host: String, operation: String },

    #[error("{host}: {reason}")]
    NonFatal { host: String, reason: String },
}

impl HostError {
    pub fn host(&self) -> &str {
        match self {
            Self::Unreachable { host, .. } | Self::Timeout { host, .. } | Self::NonFatal { host, .. } => {
                host
            }
        }
    }
}

/// Invalid or inconsistent configuration, detected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that escape the sync engine. Store failures are fatal for the run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Repository error: {0}")]
    Store(#[from] confvault_store::StoreError),

    #[error("Parse error: {0}")]
    Parse(#[from] confvault_core::ParseError),

    #[error("Zone transfer error: {0}")]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
