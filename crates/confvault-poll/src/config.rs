//! Configuration for the confvault poller.

use std::path::PathBuf;

use confvault_core::hostspec::HostDefaults;
use confvault_core::SnmpOptions;
use confvault_store::{PathMapper, StoreIdentity, VcsKind};
use confvault_store::store::{DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::transport::ToolPaths;

/// Top-level sync configuration.
///
/// Loaded from the `[sync]` table of `confvault.toml` or
/// `CONFVAULT__SYNC__*` environment variables. CLI flags are applied on top
/// by the binary.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Root directory of the versioned store.
    #[serde(default)]
    pub repository: Option<PathBuf>,

    /// Hostname pattern: filters the working set and lays out the store.
    #[serde(default)]
    pub regex: String,

    #[serde(default)]
    pub vcs: VcsKind,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Default device credentials for host strings without their own.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub snmp: SnmpOptions,

    /// Hostnames never polled.
    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub blacklist_file: Option<PathBuf>,

    /// Host strings (or `file:` redirects) polled on every run.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Domains expanded by zone transfer on every run.
    #[serde(default)]
    pub domains: Vec<String>,

    /// Nameserver queried for zone transfers; the resolver default otherwise.
    #[serde(default)]
    pub nameserver: Option<String>,

    #[serde(default = "default_zone_timeout")]
    pub zone_timeout_secs: u64,

    /// Hosts fetched concurrently. 1 polls sequentially.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_polls: usize,

    /// Reject hosts whose repository path overlaps another host's.
    #[serde(default)]
    pub enforce_unique_paths: bool,

    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_author_name() -> String {
    DEFAULT_AUTHOR_NAME.to_string()
}

fn default_author_email() -> String {
    DEFAULT_AUTHOR_EMAIL.to_string()
}

fn default_zone_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    1
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repository: None,
            regex: String::new(),
            vcs: VcsKind::default(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            username: None,
            password: None,
            snmp: SnmpOptions::default(),
            blacklist: Vec::new(),
            blacklist_file: None,
            hosts: Vec::new(),
            domains: Vec::new(),
            nameserver: None,
            zone_timeout_secs: default_zone_timeout(),
            max_concurrent_polls: default_max_concurrent(),
            enforce_unique_paths: false,
            tools: ToolPaths::default(),
        }
    }
}

impl SyncConfig {
    /// Load from `<file_prefix>.toml` (optional) and the environment.
    ///
    /// A missing `[sync]` table yields the defaults; a malformed one is an
    /// error.
    pub fn load(file_prefix: &str) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("CONFVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<SyncConfig>("sync") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check everything that can be checked before touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.repository {
            None => return Err(ConfigError::Invalid("repository is required".to_string())),
            Some(p) if p.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid("repository is required".to_string()))
            }
            Some(_) => {}
        }

        self.path_mapper()?;

        if self.max_concurrent_polls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_polls must be at least 1".to_string(),
            ));
        }
        if self.snmp.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "snmp.timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn path_mapper(&self) -> Result<PathMapper, ConfigError> {
        PathMapper::new(&self.regex).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn identity(&self) -> StoreIdentity {
        StoreIdentity {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }

    pub fn host_defaults(&self) -> HostDefaults {
        HostDefaults {
            username: self.username.clone(),
            password: self.password.clone(),
            snmp: self.snmp.clone(),
        }
    }
}
