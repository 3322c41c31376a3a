//! Host specification parsing.
//!
//! Hosts arrive as `[user[:pass]@]hostname` strings, either inline (CLI
//! arguments), one per line in a text file, or as the first column of a CSV
//! file whose remaining columns override SNMP settings for that row:
//!
//! ```text
//! host_string[,community[,port[,version[,timeout[,retries]]]]]
//! ```
//!
//! Blank lines and lines starting with `#` are ignored everywhere.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{ParseError, Result};
use crate::types::{HostDescriptor, SnmpOptions, SnmpOverrides, SnmpVersion};

/// Prefix that turns a host argument into a file import.
pub const FILE_PREFIX: &str = "file:";

/// Values applied to every host that does not specify its own.
#[derive(Debug, Clone, Default)]
pub struct HostDefaults {
    pub username: Option<String>,
    pub password: Option<String>,
    pub snmp: SnmpOptions,
}

/// The three components of a host string, before defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostString {
    pub hostname: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Split a host string into its components.
///
/// The last `@` separates credentials from the hostname and the first `:`
/// of the credential part separates user from password, so passwords may
/// contain both `@` and `:`.
pub fn parse_host_string(input: &str) -> Result<HostString> {
    let input = input.trim();

    let (credentials, hostname) = match input.rfind('@') {
        Some(idx) => (Some(&input[..idx]), &input[idx + 1..]),
        None => (None, input),
    };

    validate_hostname(input, hostname)?;

    let (username, password) = match credentials {
        None => (None, None),
        Some(creds) => match creds.split_once(':') {
            Some((user, pass)) => (non_empty(user), Some(pass.to_string())),
            None => (non_empty(creds), None),
        },
    };

    Ok(HostString {
        hostname: hostname.to_string(),
        username,
        password,
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn validate_hostname(input: &str, hostname: &str) -> Result<()> {
    let reason = if hostname.is_empty() {
        "empty hostname"
    } else if hostname.chars().any(char::is_whitespace) {
        "hostname contains whitespace"
    } else if hostname.contains('/') {
        "hostname contains '/'"
    } else if hostname == "." || hostname == ".." {
        "hostname is a relative path component"
    } else {
        return Ok(());
    };

    Err(ParseError::InvalidHostString {
        input: input.to_string(),
        reason: reason.to_string(),
    })
}

/// Parse one line into a descriptor. Comments and blank lines yield `None`.
pub fn parse_line(line: &str, defaults: &HostDefaults) -> Result<Option<HostDescriptor>> {
    let line = line.trim();
    if is_skippable(line) {
        return Ok(None);
    }

    let parsed = parse_host_string(line)?;
    Ok(Some(descriptor_from(parsed, defaults, &SnmpOverrides::default())))
}

/// Build a descriptor from parsed components, falling back to `defaults`
/// for missing credentials and merging `overrides` over the default SNMP
/// options.
pub fn descriptor_from(
    parsed: HostString,
    defaults: &HostDefaults,
    overrides: &SnmpOverrides,
) -> HostDescriptor {
    HostDescriptor::new(parsed.hostname)
        .with_credentials(
            parsed.username.or_else(|| defaults.username.clone()),
            parsed.password.or_else(|| defaults.password.clone()),
        )
        .with_snmp(defaults.snmp.merged(overrides))
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

// ── Sources ───────────────────────────────────────────────────────

/// Where a host argument points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    /// A single `[user[:pass]@]hostname` string.
    Inline(String),
    /// A `file:<path>` redirect to a text or CSV import.
    File(PathBuf),
}

impl HostSpec {
    pub fn parse(value: &str) -> Self {
        match value.trim().strip_prefix(FILE_PREFIX) {
            Some(path) => Self::File(PathBuf::from(path)),
            None => Self::Inline(value.trim().to_string()),
        }
    }
}

/// Host file formats, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Csv,
}

impl FileFormat {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Text,
        }
    }
}

/// One host string read from a file, with any per-row SNMP overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub host_string: String,
    pub overrides: SnmpOverrides,
}

/// Outcome of a file import: the entries that parsed and the rows that
/// did not. Row errors never abort the import.
#[derive(Debug)]
pub struct ImportReport<T> {
    pub entries: Vec<T>,
    pub errors: Vec<ParseError>,
}

impl<T> Default for ImportReport<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            errors: Vec::new(),
        }
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| ParseError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Read raw host entries from a text or CSV file.
///
/// Fails only when the file itself cannot be opened.
pub fn read_host_file(path: &Path) -> Result<ImportReport<HostEntry>> {
    let format = FileFormat::detect(path);
    let report = match format {
        FileFormat::Text => read_text_file(path)?,
        FileFormat::Csv => read_csv_file(path)?,
    };

    tracing::debug!(
        file = %path.display(),
        ?format,
        entries = report.entries.len(),
        errors = report.errors.len(),
        "Read host file"
    );
    Ok(report)
}

fn read_text_file(path: &Path) -> Result<ImportReport<HostEntry>> {
    let reader = BufReader::new(open(path)?);
    let mut report = ImportReport::default();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(source) => {
                report.errors.push(ParseError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                });
                break;
            }
        };
        let line = line.trim();
        if is_skippable(line) {
            continue;
        }
        report.entries.push(HostEntry {
            host_string: line.to_string(),
            overrides: SnmpOverrides::default(),
        });
    }

    Ok(report)
}

fn read_csv_file(path: &Path) -> Result<ImportReport<HostEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(open(path)?);
    let mut report = ImportReport::default();

    for record in reader.records() {
        match record {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                match csv_entry(&record) {
                    Ok(Some(entry)) => report.entries.push(entry),
                    Ok(None) => {}
                    Err(reason) => report.errors.push(ParseError::InvalidCsvRow {
                        path: path.to_path_buf(),
                        line,
                        reason,
                    }),
                }
            }
            Err(e) => report.errors.push(ParseError::InvalidCsvRow {
                path: path.to_path_buf(),
                line: e.position().map(|p| p.line()).unwrap_or_default(),
                reason: e.to_string(),
            }),
        }
    }

    Ok(report)
}

fn csv_entry(record: &csv::StringRecord) -> std::result::Result<Option<HostEntry>, String> {
    let cell = |idx: usize| record.get(idx).filter(|v| !v.is_empty());

    let Some(host_string) = cell(0) else {
        return Ok(None);
    };

    let overrides = SnmpOverrides {
        community: cell(1).map(str::to_string),
        port: cell(2)
            .map(|v| v.parse::<u16>().map_err(|e| format!("port {v:?}: {e}")))
            .transpose()?,
        version: cell(3)
            .map(|v| v.parse::<SnmpVersion>().map_err(|e| e.to_string()))
            .transpose()?,
        timeout_secs: cell(4)
            .map(|v| v.parse::<u64>().map_err(|e| format!("timeout {v:?}: {e}")))
            .transpose()?,
        retries: cell(5)
            .map(|v| v.parse::<u32>().map_err(|e| format!("retries {v:?}: {e}")))
            .transpose()?,
    };

    Ok(Some(HostEntry {
        host_string: host_string.to_string(),
        overrides,
    }))
}

/// Read a file and turn every entry into a descriptor.
///
/// Entries that fail to parse are reported alongside the CSV row errors.
pub fn parse_file(path: &Path, defaults: &HostDefaults) -> Result<ImportReport<HostDescriptor>> {
    let raw = read_host_file(path)?;
    let mut report = ImportReport {
        entries: Vec::with_capacity(raw.entries.len()),
        errors: raw.errors,
    };

    for entry in raw.entries {
        match parse_host_string(&entry.host_string) {
            Ok(parsed) => report
                .entries
                .push(descriptor_from(parsed, defaults, &entry.overrides)),
            Err(e) => report.errors.push(e),
        }
    }

    Ok(report)
}

/// Read a blacklist: one host string per line, only the hostname is kept,
/// duplicates dropped in first-seen order.
pub fn read_blacklist(path: &Path) -> Result<ImportReport<String>> {
    let raw = read_text_file(path)?;
    let mut report = ImportReport {
        entries: Vec::new(),
        errors: raw.errors,
    };

    for entry in raw.entries {
        match parse_host_string(&entry.host_string) {
            Ok(parsed) => {
                if !report.entries.contains(&parsed.hostname) {
                    report.entries.push(parsed.hostname);
                }
            }
            Err(e) => report.errors.push(e),
        }
    }

    Ok(report)
}
