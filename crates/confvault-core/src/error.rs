use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning host strings and host files into descriptors.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid host string {input:?}: {reason}")]
    InvalidHostString { input: String, reason: String },

    #[error("Invalid CSV row {line} in {path}: {reason}")]
    InvalidCsvRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Invalid SNMP version: {0} (expected 1 or 2c)")]
    InvalidSnmpVersion(String),

    #[error("Cannot read host file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ParseError>;
