//! Hostname to repository directory mapping.
//!
//! A user-supplied regular expression is matched against each hostname.
//! Its capture groups become leading directories and the full hostname is
//! the leaf directory:
//!
//! ```text
//! pattern  ^[^.]+\.([^.]+)\.example\.com$
//! host     core1.nyc.example.com
//! path     nyc/core1.nyc.example.com/
//! ```
//!
//! Because the hostname is always the leaf, distinct hostnames get distinct
//! paths. Two paths can still alias on disk: on a case-insensitive
//! filesystem, or when one host's directory ends up nested inside another's.
//! [`RepositoryPath::conflicts_with`] detects both.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Result, StoreError};

/// Directory of one host inside the repository, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryPath(PathBuf);

impl RepositoryPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Whether two host directories would share files on disk: equal when
    /// compared case-insensitively, or one nested inside the other.
    pub fn conflicts_with(&self, other: &RepositoryPath) -> bool {
        let lower = |p: &Path| -> Vec<String> {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect()
        };
        let (a, b) = (lower(&self.0), lower(&other.0));
        a.starts_with(&b) || b.starts_with(&a)
    }

    /// Path of a named file inside this host directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.0.display())
    }
}

/// Compiled hostname pattern used both to accept hosts and to place them.
#[derive(Debug, Clone)]
pub struct PathMapper {
    regex: Regex,
}

impl PathMapper {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, hostname: &str) -> bool {
        self.regex.is_match(hostname)
    }

    /// Compute the repository directory for `hostname`.
    ///
    /// Capture groups that did not participate in the match, or matched the
    /// empty string, are skipped. The hostname itself must be a plain
    /// directory name so the result never leaves the repository root.
    pub fn path_for(&self, hostname: &str) -> Result<RepositoryPath> {
        let unmapped = |reason: &str| StoreError::UnmappedHost {
            hostname: hostname.to_string(),
            reason: reason.to_string(),
        };

        if let Some(reason) = leaf_problem(hostname) {
            return Err(unmapped(reason));
        }

        let captures = self
            .regex
            .captures(hostname)
            .ok_or_else(|| unmapped("hostname does not match the path pattern"))?;

        let mut path = PathBuf::new();
        for segment in captures.iter().skip(1).flatten() {
            let segment = segment.as_str();
            if segment.is_empty() {
                continue;
            }
            if segment == "." || segment == ".." || segment.contains('/') {
                return Err(unmapped(&format!("capture {segment:?} is not a directory name")));
            }
            path.push(segment);
        }
        path.push(hostname);

        Ok(RepositoryPath(path))
    }
}

fn leaf_problem(hostname: &str) -> Option<&'static str> {
    if hostname.is_empty() {
        Some("empty hostname")
    } else if hostname.chars().any(char::is_whitespace) {
        Some("hostname contains whitespace")
    } else if hostname.contains(['/', '\\']) {
        Some("hostname contains a path separator")
    } else if hostname == "." || hostname == ".." {
        Some("hostname is a relative path component")
    } else {
        None
    }
}

impl Default for PathMapper {
    /// The empty pattern: accepts every hostname and stores it at the root.
    fn default() -> Self {
        Self {
            regex: Regex::new("").expect("empty pattern is valid"),
        }
    }
}
