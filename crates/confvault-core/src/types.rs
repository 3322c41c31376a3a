//! Core domain types shared by the store and the poller.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

// ── SNMP options ──────────────────────────────────────────────────

pub const SNMP_DEFAULT_COMMUNITY: &str = "public";
pub const SNMP_DEFAULT_PORT: u16 = 161;
pub const SNMP_DEFAULT_TIMEOUT_SECS: u64 = 3;
pub const SNMP_DEFAULT_RETRIES: u32 = 2;

/// Supported SNMP protocol versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

impl SnmpVersion {
    /// The value net-snmp tools expect for `-v`.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2c => "2c",
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for SnmpVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "v1" | "snmpv1" => Ok(Self::V1),
            "2c" | "v2c" | "snmpv2c" => Ok(Self::V2c),
            other => Err(ParseError::InvalidSnmpVersion(other.to_string())),
        }
    }
}

impl TryFrom<String> for SnmpVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SnmpVersion> for String {
    fn from(version: SnmpVersion) -> Self {
        version.as_arg().to_string()
    }
}

/// Per-host SNMP settings used for fingerprinting and SNMP-based retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpOptions {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_community")]
    pub community: String,

    #[serde(default)]
    pub version: SnmpVersion,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_port() -> u16 {
    SNMP_DEFAULT_PORT
}

fn default_community() -> String {
    SNMP_DEFAULT_COMMUNITY.to_string()
}

fn default_timeout() -> u64 {
    SNMP_DEFAULT_TIMEOUT_SECS
}

fn default_retries() -> u32 {
    SNMP_DEFAULT_RETRIES
}

impl Default for SnmpOptions {
    fn default() -> Self {
        Self {
            port: default_port(),
            community: default_community(),
            version: SnmpVersion::default(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl SnmpOptions {
    /// Shallow merge: every value present in `overrides` replaces ours.
    pub fn merged(&self, overrides: &SnmpOverrides) -> Self {
        Self {
            port: overrides.port.unwrap_or(self.port),
            community: overrides
                .community
                .clone()
                .unwrap_or_else(|| self.community.clone()),
            version: overrides.version.unwrap_or(self.version),
            timeout_secs: overrides.timeout_secs.unwrap_or(self.timeout_secs),
            retries: overrides.retries.unwrap_or(self.retries),
        }
    }
}

/// Optional SNMP values supplied per host (CSV rows, CLI flags).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpOverrides {
    pub port: Option<u16>,
    pub community: Option<String>,
    pub version: Option<SnmpVersion>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

impl SnmpOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Layer `other` on top of `self`; values in `other` win.
    pub fn overlay(&self, other: &SnmpOverrides) -> Self {
        Self {
            port: other.port.or(self.port),
            community: other.community.clone().or_else(|| self.community.clone()),
            version: other.version.or(self.version),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            retries: other.retries.or(self.retries),
        }
    }
}

// ── Host descriptor ───────────────────────────────────────────────

/// Identity, credentials, and protocol options for one device.
///
/// Two descriptors are equal when their hostnames are equal; credentials and
/// SNMP options do not participate in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub hostname: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub snmp: SnmpOptions,
}

impl HostDescriptor {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: None,
            password: None,
            snmp: SnmpOptions::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_snmp(mut self, snmp: SnmpOptions) -> Self {
        self.snmp = snmp;
        self
    }

    /// Re-serialize into the `[user[:pass]@]hostname` grammar.
    pub fn to_host_string(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@{}", self.hostname),
            (Some(user), None) => format!("{user}@{}", self.hostname),
            (None, Some(pass)) => format!(":{pass}@{}", self.hostname),
            (None, None) => self.hostname.clone(),
        }
    }
}

impl PartialEq for HostDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
    }
}

impl Eq for HostDescriptor {}

impl Hash for HostDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)
    }
}

// ── Configuration snapshots ───────────────────────────────────────

/// Strip trailing CR/LF characters from a single line.
pub fn normalize_line(line: &str) -> String {
    line.trim_end_matches(['\r', '\n']).to_string()
}

/// Split raw device output into lines, accepting `\r\n`, `\r`, or `\n`
/// terminators. A trailing terminator does not produce an empty last line.
pub fn split_lines(text: &str) -> Vec<String> {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = unified.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Normalize a sequence of lines. Embedded terminators split a line in two,
/// so the result reads back from disk exactly as it was written.
pub fn normalize_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for line in lines {
        let line = normalize_line(line.as_ref());
        if line.contains(['\r', '\n']) {
            out.extend(split_lines(&line));
        } else {
            out.push(line);
        }
    }
    out
}

/// The configuration of one device at fetch time: named files, each an
/// ordered sequence of normalized lines.
///
/// A file mapped to `None` was reported by the device but came back empty;
/// the store skips it instead of overwriting the last good copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    files: BTreeMap<String, Option<Vec<String>>>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a file. Lines are normalized on the way in.
    pub fn with_file<I, S>(mut self, name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(name, lines);
        self
    }

    /// Add (or replace) a file. A file with no lines at all is recorded as
    /// empty from the device.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines = normalize_lines(lines);
        if lines.is_empty() {
            self.insert_empty(name);
        } else {
            self.files.insert(name.into(), Some(lines));
        }
    }

    /// Record a file the device returned nothing for.
    pub fn insert_empty(&mut self, name: impl Into<String>) {
        self.files.insert(name.into(), None);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.files.get(name).and_then(|f| f.as_deref())
    }

    /// Iterate files in name order.
    pub fn files(&self) -> impl Iterator<Item = (&str, Option<&[String]>)> {
        self.files
            .iter()
            .map(|(name, lines)| (name.as_str(), lines.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snmp_defaults() {
        let opts = SnmpOptions::default();
        assert_eq!(opts.port, 161);
        assert_eq!(opts.community, "public");
        assert_eq!(opts.version, SnmpVersion::V2c);
        assert_eq!(opts.timeout_secs, 3);
        assert_eq!(opts.retries, 2);
    }

    #[test]
    fn test_snmp_merge_override_wins() {
        let base = SnmpOptions::default();
        let overrides = SnmpOverrides {
            community: Some("private".to_string()),
            retries: Some(0),
            ..Default::default()
        };
        let merged = base.merged(&overrides);
        assert_eq!(merged.community, "private");
        assert_eq!(merged.retries, 0);
        assert_eq!(merged.port, 161);
        assert_eq!(merged.timeout_secs, 3);
    }

    #[test]
    fn test_snmp_version_parse() {
        assert_eq!("1".parse::<SnmpVersion>().unwrap(), SnmpVersion::V1);
        assert_eq!("SNMPv2c".parse::<SnmpVersion>().unwrap(), SnmpVersion::V2c);
        assert!("3".parse::<SnmpVersion>().is_err());
    }

    #[test]
    fn test_descriptor_identity_is_hostname() {
        let a = HostDescriptor::new("r1.example.com")
            .with_credentials(Some("a".into()), Some("x".into()));
        let b = HostDescriptor::new("r1.example.com");
        let c = HostDescriptor::new("R1.example.com");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_lines_any_terminator() {
        assert_eq!(split_lines("a\r\nb\rc\nd\n"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines(""), Vec::<String>::new());
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_snapshot_normalizes_lines() {
        let snap = ConfigSnapshot::new().with_file("config", ["one\r\n", "two\n", "three"]);
        assert_eq!(snap.get("config").unwrap(), ["one", "two", "three"]);
    }

    #[test]
    fn test_snapshot_splits_embedded_newlines() {
        let snap = ConfigSnapshot::new().with_file("config", ["one\ntwo\r\n", "", "three\rfour"]);
        assert_eq!(snap.get("config").unwrap(), ["one", "two", "", "three", "four"]);
    }

    #[test]
    fn test_snapshot_without_lines_is_empty_from_device() {
        let snap = ConfigSnapshot::new().with_file("running-config", Vec::<String>::new());
        assert_eq!(snap.len(), 1);
        assert!(snap.get("running-config").is_none());
        assert_eq!(snap.files().next(), Some(("running-config", None)));
    }

    #[test]
    fn test_snapshot_empty_file() {
        let mut snap = ConfigSnapshot::new();
        snap.insert_empty("startup-config");
        assert_eq!(snap.len(), 1);
        assert!(snap.get("startup-config").is_none());
        assert_eq!(snap.files().next(), Some(("startup-config", None)));
    }
}
