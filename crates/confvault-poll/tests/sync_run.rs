//! End-to-end runs of the sync engine against scripted devices and an
//! in-memory version-control backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use confvault_core::HostDescriptor;
use confvault_poll::driver::SYS_DESCR_OID;
use confvault_poll::{
    DeviceTransport, Driver, EngineSettings, HostOutcome, SyncEngine, SyncError, TransportError,
    ZoneEnumerator, ZoneError,
};
use confvault_store::error::Result as StoreResult;
use confvault_store::{
    CommitId, PathMapper, StoreError, StoreIdentity, VcsBackend, VersionedStore,
};

// ── Doubles ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct VcsLog {
    initialized: bool,
    staged: bool,
    config: Vec<(String, String)>,
    commits: Vec<String>,
}

struct MemoryVcs {
    log: Arc<Mutex<VcsLog>>,
}

impl VcsBackend for MemoryVcs {
    fn exists(&self, _root: &Path) -> bool {
        self.log.lock().unwrap().initialized
    }

    fn init(&mut self, _root: &Path) -> StoreResult<()> {
        self.log.lock().unwrap().initialized = true;
        Ok(())
    }

    fn open(&mut self, _root: &Path) -> StoreResult<()> {
        Ok(())
    }

    fn config_set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.log
            .lock()
            .unwrap()
            .config
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn add(&mut self, _pathspec: &str) -> StoreResult<()> {
        self.log.lock().unwrap().staged = true;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> StoreResult<Option<CommitId>> {
        let mut log = self.log.lock().unwrap();
        if !log.staged {
            return Ok(None);
        }
        log.staged = false;
        log.commits.push(message.to_string());
        Ok(Some(CommitId(format!("c{}", log.commits.len()))))
    }
}

#[derive(Clone)]
struct Device {
    sys_descr: String,
    files: HashMap<String, String>,
    reachable: bool,
}

#[derive(Default)]
struct Devices {
    devices: Mutex<HashMap<String, Device>>,
    fingerprints: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    downloads: Mutex<HashMap<String, usize>>,
}

impl Devices {
    fn add(&self, hostname: &str, sys_descr: &str, remote_path: &str, contents: &str) {
        self.devices.lock().unwrap().insert(
            hostname.to_string(),
            Device {
                sys_descr: sys_descr.to_string(),
                files: HashMap::from([(remote_path.to_string(), contents.to_string())]),
                reachable: true,
            },
        );
    }

    fn cisco(&self, hostname: &str, contents: &str) {
        self.add(hostname, "Cisco IOS Software", "system:running-config", contents);
    }

    fn screenos(&self, hostname: &str, contents: &str) {
        self.add(hostname, "NetScreen-5GT version 5.4.0", "ns_sys_config", contents);
    }

    fn unreachable(&self, hostname: &str) {
        self.devices.lock().unwrap().insert(
            hostname.to_string(),
            Device {
                sys_descr: String::new(),
                files: HashMap::new(),
                reachable: false,
            },
        );
    }

    fn slow(&self, hostname: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(hostname.to_string(), delay);
    }

    fn fingerprints(&self, hostname: &str) -> usize {
        self.fingerprints.lock().unwrap().get(hostname).copied().unwrap_or(0)
    }

    fn downloads(&self, hostname: &str) -> usize {
        self.downloads.lock().unwrap().get(hostname).copied().unwrap_or(0)
    }

    fn device(&self, hostname: &str) -> Result<Device, TransportError> {
        match self.devices.lock().unwrap().get(hostname) {
            Some(d) if d.reachable => Ok(d.clone()),
            _ => Err(TransportError::Unreachable(format!("no route to {hostname}"))),
        }
    }
}

#[async_trait]
impl DeviceTransport for Devices {
    async fn snmp_get(&self, host: &HostDescriptor, oid: &str) -> Result<String, TransportError> {
        if oid == SYS_DESCR_OID {
            *self
                .fingerprints
                .lock()
                .unwrap()
                .entry(host.hostname.clone())
                .or_default() += 1;
        }
        Ok(self.device(&host.hostname)?.sys_descr)
    }

    async fn scp_download(
        &self,
        host: &HostDescriptor,
        remote_path: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let delay = self.delays.lock().unwrap().get(&host.hostname).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(host.hostname.clone())
            .or_default() += 1;
        self.device(&host.hostname)?
            .files
            .get(remote_path)
            .map(|c| c.as_bytes().to_vec())
            .ok_or_else(|| TransportError::Failed(format!("{remote_path}: no such file")))
    }
}

struct NoZones;

#[async_trait]
impl ZoneEnumerator for NoZones {
    async fn enumerate(&self, domain: &str) -> Result<Vec<String>, ZoneError> {
        Err(ZoneError::Failed {
            domain: domain.to_string(),
            reason: "transfers disabled".to_string(),
        })
    }
}

struct Harness {
    engine: SyncEngine,
    devices: Arc<Devices>,
    vcs: Arc<Mutex<VcsLog>>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(settings: EngineSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(Mutex::new(VcsLog::default()));
        let mut store =
            VersionedStore::new(dir.path(), Box::new(MemoryVcs { log: vcs.clone() })).unwrap();
        store.prepare(&StoreIdentity::default()).unwrap();

        let devices = Arc::new(Devices::default());
        let engine = SyncEngine::new(settings, store, devices.clone(), Arc::new(NoZones));

        Self {
            engine,
            devices,
            vcs,
            dir,
        }
    }

    fn commits(&self) -> Vec<String> {
        self.vcs.lock().unwrap().commits.clone()
    }

    fn stored(&self, relative: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(relative)).unwrap()
    }
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn two_hosts_commit_once_then_nothing() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco(
        "r1.example.com",
        "Building configuration...\r\n\r\nCurrent configuration : 42 bytes\r\nhostname r1\r\n!\r\nend\r\n",
    );
    h.devices
        .screenos("fw1.example.com", "Total Config size 42:\rset hostname fw1\r");

    assert!(h.engine.add_host(HostDescriptor::new("r1.example.com")));
    assert!(h.engine.add_host(HostDescriptor::new("fw1.example.com")));

    let first = h.engine.run(None).await.unwrap();
    assert_eq!(first.hosts_processed, 2);
    assert_eq!(first.files_written, 2);
    assert_eq!(first.commit.as_deref(), Some("c1"));
    assert_eq!(h.commits(), ["Processed 2 host(s)"]);

    assert_eq!(
        h.stored("r1.example.com/running-config"),
        "\nhostname r1\n!\nend\n"
    );
    assert_eq!(h.stored("fw1.example.com/config"), "set hostname fw1\n");

    let second = h.engine.run(None).await.unwrap();
    assert_eq!(second.files_written, 0);
    assert_eq!(second.commit, None);
    assert!(second
        .hosts
        .iter()
        .all(|r| r.outcome == HostOutcome::Unchanged));
    assert_eq!(h.commits().len(), 1);
}

#[tokio::test]
async fn failing_hosts_do_not_abort_the_batch() {
    let mut h = Harness::new(EngineSettings::default());
    for name in ["r1", "r2", "r3"] {
        h.devices.cisco(name, &format!("hostname {name}\nend\n"));
        h.engine.add_host(HostDescriptor::new(name));
    }
    h.devices.unreachable("r4");
    h.engine.add_host(HostDescriptor::new("r4"));

    let report = h.engine.run(Some("nightly")).await.unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.changed(), 3);
    assert!(matches!(
        &report.hosts[3].outcome,
        HostOutcome::Failed { reason } if reason.contains("unreachable")
    ));
    assert!(!h.dir.path().join("r4").exists());
    assert_eq!(h.commits(), ["nightly"]);
}

#[tokio::test]
async fn all_hosts_failing_means_no_commit() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.unreachable("r1");
    h.engine.add_host(HostDescriptor::new("r1"));

    let report = h.engine.run(None).await.unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.commit, None);
    assert!(h.commits().is_empty());
}

#[tokio::test]
async fn changed_device_config_is_committed_again() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco("r1", "hostname r1\nend\n");
    h.engine.add_host(HostDescriptor::new("r1"));
    h.engine.run(None).await.unwrap();

    h.devices.cisco("r1", "hostname r1\nip domain-name lab\nend\n");
    let report = h.engine.run(None).await.unwrap();

    assert_eq!(report.hosts[0].outcome, HostOutcome::Changed { files: 1 });
    assert_eq!(h.commits().len(), 2);
    assert_eq!(h.stored("r1/running-config"), "hostname r1\nip domain-name lab\nend\n");
}

#[tokio::test]
async fn driver_is_resolved_once_across_runs() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco("r1", "hostname r1\nend\n");
    h.engine.add_host(HostDescriptor::new("r1"));

    h.engine.run(None).await.unwrap();
    let report = h.engine.run(None).await.unwrap();

    assert_eq!(h.devices.fingerprints("r1"), 1);
    assert_eq!(report.hosts[0].driver, Some(Driver::Cisco));
}

#[tokio::test]
async fn filtered_hosts_are_never_contacted() {
    let settings = EngineSettings {
        mapper: PathMapper::new(r"\.example\.com$").unwrap(),
        blacklist: vec!["bad.example.com".to_string()],
        ..Default::default()
    };
    let mut h = Harness::new(settings);
    for name in ["good.example.com", "bad.example.com", "other.org"] {
        h.devices.cisco(name, "end\n");
        h.engine.add_host(HostDescriptor::new(name));
    }

    let report = h.engine.run(None).await.unwrap();

    assert_eq!(report.hosts_processed, 1);
    assert_eq!(h.devices.fingerprints("good.example.com"), 1);
    assert_eq!(h.devices.fingerprints("bad.example.com"), 0);
    assert_eq!(h.devices.fingerprints("other.org"), 0);
}

#[tokio::test]
async fn duplicate_adds_are_idempotent() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco("r1", "end\n");

    assert!(h.engine.add_host(HostDescriptor::new("r1")));
    assert!(!h.engine.add_host(
        HostDescriptor::new("r1").with_credentials(Some("admin".to_string()), None)
    ));

    let report = h.engine.run(None).await.unwrap();
    assert_eq!(report.hosts_processed, 1);
    assert_eq!(h.devices.fingerprints("r1"), 1);
}

#[tokio::test]
async fn concurrent_polls_apply_in_insertion_order() {
    let settings = EngineSettings {
        mapper: PathMapper::new(r"^([a-z]+)\d").unwrap(),
        max_concurrent_polls: 4,
        ..Default::default()
    };
    let mut h = Harness::new(settings);

    let names: Vec<String> = (1..=8).map(|i| format!("sw{i}")).collect();
    for name in &names {
        h.devices.cisco(name, &format!("hostname {name}\n"));
        h.engine.add_host(HostDescriptor::new(name.as_str()));
    }

    let report = h.engine.run(None).await.unwrap();

    let order: Vec<&str> = report.hosts.iter().map(|r| r.hostname.as_str()).collect();
    assert_eq!(order, names.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(report.hosts[0].path, "sw/sw1/");
    assert_eq!(h.stored("sw/sw8/running-config"), "hostname sw8\n");
    assert_eq!(h.commits(), ["Processed 8 host(s)"]);
}

#[tokio::test]
async fn report_serializes_outcomes() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco("r1", "end\n");
    h.devices.unreachable("r2");
    h.engine.add_host(HostDescriptor::new("r1"));
    h.engine.add_host(HostDescriptor::new("r2"));

    let report = h.engine.run(None).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["hosts"][0]["status"], "changed");
    assert_eq!(json["hosts"][0]["driver"], "cisco");
    assert_eq!(json["hosts"][1]["status"], "failed");
    assert!(json["hosts"][1]["driver"].is_null());
    assert_eq!(json["files_written"], 1);
}

#[tokio::test]
async fn init_records_commit_identity() {
    let h = Harness::new(EngineSettings::default());
    let config = h.vcs.lock().unwrap().config.clone();
    assert!(config.contains(&("user.name".to_string(), "confvault".to_string())));
    assert!(config.contains(&("user.email".to_string(), "nobody@nowhere.com".to_string())));
}

#[tokio::test]
async fn empty_device_output_keeps_stored_config() {
    let mut h = Harness::new(EngineSettings::default());
    h.devices.cisco("r1", "hostname r1\nend\n");
    h.engine.add_host(HostDescriptor::new("r1"));
    h.engine.run(None).await.unwrap();

    // Only the banner comes back, which leaves no configuration lines.
    h.devices.cisco("r1", "Building configuration...\r\n");
    let report = h.engine.run(None).await.unwrap();

    assert_eq!(report.hosts[0].outcome, HostOutcome::Unchanged);
    assert_eq!(report.files_written, 0);
    assert_eq!(report.commit, None);
    assert_eq!(h.commits().len(), 1);
    assert_eq!(h.stored("r1/running-config"), "hostname r1\nend\n");

    h.devices.cisco("r1", "");
    h.engine.run(None).await.unwrap();
    assert_eq!(h.stored("r1/running-config"), "hostname r1\nend\n");
    assert_eq!(h.commits().len(), 1);
}

#[tokio::test]
async fn store_failure_cancels_pending_polls() {
    let settings = EngineSettings {
        max_concurrent_polls: 1,
        ..Default::default()
    };
    let mut h = Harness::new(settings);
    h.devices.cisco("r1", "hostname r1\nend\n");
    h.devices.cisco("r2", "hostname r2\nend\n");
    h.devices.slow("r2", Duration::from_millis(200));
    h.engine.add_host(HostDescriptor::new("r1"));
    h.engine.add_host(HostDescriptor::new("r2"));

    // A regular file where r1's directory belongs makes its write fail.
    std::fs::write(h.dir.path().join("r1"), "not a directory").unwrap();

    let err = h.engine.run(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Io(_))));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.devices.downloads("r2"), 0);
    assert!(h.commits().is_empty());
}
