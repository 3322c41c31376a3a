//! The sync engine: working-set management and the poll/commit run.
//!
//! Hosts are admitted through an ordered filter chain (pattern, blacklist,
//! duplicate). A run fetches every admitted host, up to
//! `max_concurrent_polls` at a time, then applies the snapshots to the store
//! in insertion order and commits once if anything changed.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use confvault_core::hostspec::{
    self, descriptor_from, parse_host_string, HostDefaults, HostSpec, HostString,
};
use confvault_core::{HostDescriptor, ParseError, SnmpOverrides};
use confvault_store::{PathMapper, RepositoryPath, StoreError, StoreState, VersionedStore};

use crate::config::SyncConfig;
use crate::dns::ZoneEnumerator;
use crate::driver::Driver;
use crate::error::{ConfigError, HostError, Result};
use crate::host::HostRecord;
use crate::transport::DeviceTransport;

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub mapper: PathMapper,
    pub blacklist: Vec<String>,
    pub defaults: HostDefaults,
    pub max_concurrent_polls: usize,
    pub enforce_unique_paths: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mapper: PathMapper::default(),
            blacklist: Vec::new(),
            defaults: HostDefaults::default(),
            max_concurrent_polls: 1,
            enforce_unique_paths: false,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &SyncConfig) -> std::result::Result<Self, ConfigError> {
        let mut blacklist: Vec<String> = Vec::new();
        for hostname in &config.blacklist {
            if !blacklist.contains(hostname) {
                blacklist.push(hostname.clone());
            }
        }

        Ok(Self {
            mapper: config.path_mapper()?,
            blacklist,
            defaults: config.host_defaults(),
            max_concurrent_polls: config.max_concurrent_polls,
            enforce_unique_paths: config.enforce_unique_paths,
        })
    }
}

/// Result of offering a host to the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    /// Hostname does not match the inclusion pattern.
    Excluded,
    Blacklisted,
    /// Hostname already in the working set.
    Duplicate,
    /// Repository path overlaps another host's and uniqueness is enforced.
    PathCollision,
    /// The pattern matched but produced no usable directory.
    Unmappable,
}

impl AddOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Whether a `file:` import expands hosts or domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Host,
    Domain,
}

/// Tally of one add/import call. Malformed entries are collected, not fatal.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub errors: Vec<ParseError>,
}

impl ImportSummary {
    fn count(&mut self, outcome: AddOutcome) {
        if outcome.is_accepted() {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }

    fn absorb(&mut self, other: ImportSummary) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.errors.extend(other.errors);
    }
}

// ── Run report ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HostOutcome {
    Changed { files: usize },
    Unchanged,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub hostname: String,
    pub path: String,
    pub driver: Option<Driver>,
    #[serde(flatten)]
    pub outcome: HostOutcome,
}

/// Summary of one run, serializable for `--report-json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts_processed: usize,
    pub hosts: Vec<HostReport>,
    pub files_written: usize,
    pub commit: Option<String>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| matches!(h.outcome, HostOutcome::Failed { .. }))
            .count()
    }

    pub fn changed(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| matches!(h.outcome, HostOutcome::Changed { .. }))
            .count()
    }
}

/// Writes accumulated during one run; decides whether a commit happens.
#[derive(Debug, Default)]
struct CommitBatch {
    files: usize,
}

impl CommitBatch {
    fn record(&mut self, files: usize) {
        self.files += files;
    }

    fn is_dirty(&self) -> bool {
        self.files > 0
    }
}

// ── Engine ────────────────────────────────────────────────────────

struct WorkingHost {
    record: Arc<HostRecord>,
    path: RepositoryPath,
}

pub struct SyncEngine {
    settings: EngineSettings,
    store: VersionedStore,
    transport: Arc<dyn DeviceTransport>,
    zones: Arc<dyn ZoneEnumerator>,
    hosts: Vec<WorkingHost>,
}

impl SyncEngine {
    pub fn new(
        settings: EngineSettings,
        store: VersionedStore,
        transport: Arc<dyn DeviceTransport>,
        zones: Arc<dyn ZoneEnumerator>,
    ) -> Self {
        Self {
            settings,
            store,
            transport,
            zones,
            hosts: Vec::new(),
        }
    }

    /// Working-set hosts in insertion order.
    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.iter().map(|h| h.record.as_ref())
    }

    pub fn path_of(&self, hostname: &str) -> Option<&RepositoryPath> {
        self.hosts
            .iter()
            .find(|h| h.record.hostname() == hostname)
            .map(|h| &h.path)
    }

    pub fn blacklist(&self) -> &[String] {
        &self.settings.blacklist
    }

    /// Merge a blacklist file into the blacklist. Hosts already admitted
    /// stay in the working set.
    pub fn import_blacklist(&mut self, path: &Path) -> Result<ImportSummary> {
        let report = hostspec::read_blacklist(path)?;
        let mut summary = ImportSummary {
            errors: report.errors,
            ..Default::default()
        };

        for hostname in report.entries {
            if self.settings.blacklist.contains(&hostname) {
                summary.rejected += 1;
            } else {
                self.settings.blacklist.push(hostname);
                summary.accepted += 1;
            }
        }

        tracing::info!(
            file = %path.display(),
            added = summary.accepted,
            total = self.settings.blacklist.len(),
            "Imported blacklist"
        );
        Ok(summary)
    }

    /// Offer a host to the working set. Never touches the network.
    pub fn admit(&mut self, descriptor: HostDescriptor) -> AddOutcome {
        let hostname = descriptor.hostname.clone();

        if !self.settings.mapper.is_match(&hostname) {
            tracing::debug!(host = %hostname, "Ignoring host (pattern)");
            return AddOutcome::Excluded;
        }
        if self.settings.blacklist.iter().any(|b| *b == hostname) {
            tracing::info!(host = %hostname, "Ignoring host (blacklist)");
            return AddOutcome::Blacklisted;
        }
        if self.hosts.iter().any(|h| h.record.hostname() == hostname) {
            tracing::debug!(host = %hostname, "Ignoring host (duplicate)");
            return AddOutcome::Duplicate;
        }

        let path = match self.settings.mapper.path_for(&hostname) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(host = %hostname, error = %e, "Ignoring host (unmappable)");
                return AddOutcome::Unmappable;
            }
        };

        if let Some(other) = self.hosts.iter().find(|h| h.path.conflicts_with(&path)) {
            if self.settings.enforce_unique_paths {
                tracing::warn!(
                    host = %hostname,
                    path = %path,
                    other = %other.record.hostname(),
                    "Ignoring host (path collision)"
                );
                return AddOutcome::PathCollision;
            }
            tracing::warn!(
                host = %hostname,
                path = %path,
                other = %other.record.hostname(),
                "Repository path overlaps another host"
            );
        }

        tracing::info!(host = %hostname, path = %path, "Adding host");
        self.hosts.push(WorkingHost {
            record: Arc::new(HostRecord::new(descriptor)),
            path,
        });
        AddOutcome::Accepted
    }

    pub fn add_host(&mut self, descriptor: HostDescriptor) -> bool {
        self.admit(descriptor).is_accepted()
    }

    pub fn delete_host(&mut self, hostname: &str) -> bool {
        match self.hosts.iter().position(|h| h.record.hostname() == hostname) {
            Some(index) => {
                self.hosts.remove(index);
                tracing::info!(host = %hostname, "Removed host");
                true
            }
            None => false,
        }
    }

    fn descriptor(&self, parsed: HostString, overrides: &SnmpOverrides) -> HostDescriptor {
        descriptor_from(parsed, &self.settings.defaults, overrides)
    }

    /// Add one host string, or every host of a `file:` import.
    pub fn add_host_string(
        &mut self,
        value: &str,
        overrides: &SnmpOverrides,
    ) -> Result<ImportSummary> {
        match HostSpec::parse(value) {
            HostSpec::File(path) => self.import_host_file(&path, overrides),
            HostSpec::Inline(host_string) => {
                let mut summary = ImportSummary::default();
                match parse_host_string(&host_string) {
                    Ok(parsed) => {
                        let descriptor = self.descriptor(parsed, overrides);
                        summary.count(self.admit(descriptor));
                    }
                    Err(e) => summary.errors.push(e),
                }
                Ok(summary)
            }
        }
    }

    /// Import a text or CSV host file. Per-row SNMP values win over
    /// `overrides`. Nested `file:` entries are not followed.
    pub fn import_host_file(
        &mut self,
        path: &Path,
        overrides: &SnmpOverrides,
    ) -> Result<ImportSummary> {
        let report = hostspec::read_host_file(path)?;
        let mut summary = ImportSummary {
            errors: report.errors,
            ..Default::default()
        };

        for entry in report.entries {
            let overrides = overrides.overlay(&entry.overrides);
            match HostSpec::parse(&entry.host_string) {
                HostSpec::File(nested) => {
                    tracing::warn!(
                        file = %path.display(),
                        nested = %nested.display(),
                        "Nested file import ignored"
                    );
                    summary.rejected += 1;
                }
                HostSpec::Inline(host_string) => {
                    summary.absorb(self.add_host_string(&host_string, &overrides)?);
                }
            }
        }

        tracing::info!(
            file = %path.display(),
            accepted = summary.accepted,
            rejected = summary.rejected,
            errors = summary.errors.len(),
            "Imported host file"
        );
        Ok(summary)
    }

    /// Add every host of a domain, or of each domain in a `file:` import.
    ///
    /// Discovered hosts inherit the credentials given with the domain.
    pub async fn add_domain_string(
        &mut self,
        value: &str,
        overrides: &SnmpOverrides,
    ) -> Result<ImportSummary> {
        match HostSpec::parse(value) {
            HostSpec::File(path) => self.import_file(&path, ImportKind::Domain, overrides).await,
            HostSpec::Inline(domain_string) => self.expand_domain(&domain_string, overrides).await,
        }
    }

    async fn expand_domain(
        &mut self,
        domain_string: &str,
        overrides: &SnmpOverrides,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let parsed = match parse_host_string(domain_string) {
            Ok(parsed) => parsed,
            Err(e) => {
                summary.errors.push(e);
                return Ok(summary);
            }
        };

        let hostnames = self.zones.enumerate(&parsed.hostname).await?;
        for hostname in hostnames {
            let host = HostString {
                hostname,
                username: parsed.username.clone(),
                password: parsed.password.clone(),
            };
            let descriptor = self.descriptor(host, overrides);
            summary.count(self.admit(descriptor));
        }

        tracing::info!(
            domain = %parsed.hostname,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "Expanded domain"
        );
        Ok(summary)
    }

    /// Import a host or domain file.
    ///
    /// A failed zone transfer for one domain row is logged and skipped.
    pub async fn import_file(
        &mut self,
        path: &Path,
        kind: ImportKind,
        overrides: &SnmpOverrides,
    ) -> Result<ImportSummary> {
        if kind == ImportKind::Host {
            return self.import_host_file(path, overrides);
        }

        let report = hostspec::read_host_file(path)?;
        let mut summary = ImportSummary {
            errors: report.errors,
            ..Default::default()
        };

        for entry in report.entries {
            let overrides = overrides.overlay(&entry.overrides);
            if let HostSpec::File(nested) = HostSpec::parse(&entry.host_string) {
                tracing::warn!(
                    file = %path.display(),
                    nested = %nested.display(),
                    "Nested file import ignored"
                );
                summary.rejected += 1;
                continue;
            }
            match self.expand_domain(&entry.host_string, &overrides).await {
                Ok(expanded) => summary.absorb(expanded),
                Err(crate::error::SyncError::Zone(e)) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping domain");
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    /// Poll every host, persist what changed, and commit once.
    ///
    /// Host failures are recorded in the report; only store errors abort.
    pub async fn run(&mut self, message: Option<&str>) -> Result<RunReport> {
        if self.store.state() != StoreState::Open {
            return Err(StoreError::NotOpen.into());
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let concurrency = self.settings.max_concurrent_polls.max(1);

        tracing::info!(
            %run_id,
            hosts = self.hosts.len(),
            max_concurrent = concurrency,
            "Run started"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(self.hosts.len());

        for host in &self.hosts {
            let record = host.record.clone();
            let transport = self.transport.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Err(HostError::NonFatal {
                        host: record.hostname().to_string(),
                        reason: "poll cancelled".to_string(),
                    });
                };
                record.fetch_config(transport.as_ref()).await
            }));
        }

        let mut batch = CommitBatch::default();
        let mut reports = Vec::with_capacity(self.hosts.len());

        let mut handles = handles.into_iter();
        for host in &self.hosts {
            let Some(handle) = handles.next() else {
                break;
            };
            let hostname = host.record.hostname();
            let fetched = match handle.await {
                Ok(result) => result,
                Err(e) => Err(HostError::NonFatal {
                    host: hostname.to_string(),
                    reason: format!("poll task failed: {e}"),
                }),
            };

            let outcome = match fetched {
                Ok(snapshot) => {
                    let files = match self.store.save_snapshot(hostname, &host.path, &snapshot) {
                        Ok(files) => files,
                        Err(e) => {
                            // Polls still queued or in flight are not awaited again.
                            for pending in handles.by_ref() {
                                pending.abort();
                            }
                            return Err(e.into());
                        }
                    };
                    batch.record(files);
                    if files > 0 {
                        tracing::info!(host = %hostname, files, "Configuration changed");
                        HostOutcome::Changed { files }
                    } else {
                        HostOutcome::Unchanged
                    }
                }
                Err(e) => {
                    tracing::warn!(host = %e.host(), error = %e, "Host failed");
                    HostOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            reports.push(HostReport {
                hostname: hostname.to_string(),
                path: host.path.to_string(),
                driver: host.record.driver(),
                outcome,
            });
        }

        let commit = if batch.is_dirty() {
            let default_message = format!("Processed {} host(s)", self.hosts.len());
            self.store.add_all()?;
            self.store
                .commit(message.unwrap_or(&default_message))?
                .map(|id| id.0)
        } else {
            tracing::info!("No changes, nothing to commit");
            None
        };

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            hosts_processed: self.hosts.len(),
            hosts: reports,
            files_written: batch.files,
            commit,
        };

        tracing::info!(
            %run_id,
            hosts = report.hosts_processed,
            changed = report.changed(),
            failed = report.failed(),
            files = report.files_written,
            commit = ?report.commit,
            "Run complete"
        );
        Ok(report)
    }
}
