//! Error types for the confvault-store crate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Missing repository directory")]
    MissingRoot,

    #[error("Repository not open")]
    NotOpen,

    #[error("Repository already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Repository not initialized: {0}")]
    NotInitialized(PathBuf),

    #[error("Invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Cannot map host {hostname} into the repository: {reason}")]
    UnmappedHost { hostname: String, reason: String },

    #[error("Failed to run {program}: {source}")]
    BackendUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code}: {stderr}")]
    BackendFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
