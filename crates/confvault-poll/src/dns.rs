//! Zone-transfer host enumeration.
//!
//! A domain argument expands to the hosts named in its zone. Only the owner
//! names of address and alias records are kept; SOA, MX, TXT, and SRV
//! entries are ignored.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::transport::{run_with_deadline, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("zone transfer for {domain} failed: {reason}")]
    Failed { domain: String, reason: String },

    #[error("zone transfer for {domain} timed out")]
    Timeout { domain: String },
}

/// Source of hostnames for a domain.
#[async_trait]
pub trait ZoneEnumerator: Send + Sync {
    async fn enumerate(&self, domain: &str) -> Result<Vec<String>, ZoneError>;
}

/// Enumerates a zone with `dig AXFR`.
pub struct DigZoneEnumerator {
    program: String,
    nameserver: Option<String>,
    timeout: Duration,
}

impl DigZoneEnumerator {
    pub fn new(program: &str, nameserver: Option<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            nameserver,
            timeout,
        }
    }
}

#[async_trait]
impl ZoneEnumerator for DigZoneEnumerator {
    async fn enumerate(&self, domain: &str) -> Result<Vec<String>, ZoneError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["+noall", "+answer", "AXFR", domain]);
        if let Some(ns) = &self.nameserver {
            cmd.arg(format!("@{ns}"));
        }

        tracing::info!(domain, nameserver = ?self.nameserver, "Zone transfer");

        let output = run_with_deadline(cmd, &self.program, self.timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => ZoneError::Timeout {
                    domain: domain.to_string(),
                },
                other => ZoneError::Failed {
                    domain: domain.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.contains("; Transfer failed.") {
            return Err(ZoneError::Failed {
                domain: domain.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let hosts = parse_zone_listing(&stdout);
        tracing::info!(domain, hosts = hosts.len(), "Zone transfer complete");
        Ok(hosts)
    }
}

/// Extract hostnames from a `dig +answer` listing, in order, without
/// duplicates or trailing dots.
pub fn parse_zone_listing(listing: &str) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();

    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        // owner TTL class type rdata...
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(rtype) = fields.get(3) else {
            continue;
        };
        if !matches!(rtype.to_ascii_uppercase().as_str(), "A" | "AAAA" | "CNAME") {
            continue;
        }

        let owner = fields[0].trim_end_matches('.').to_string();
        if !owner.is_empty() && !hosts.contains(&owner) {
            hosts.push(owner);
        }
    }

    hosts
}
