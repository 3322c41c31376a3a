//! confvault-poll: Pull device configurations into a versioned store.
//!
//! Fingerprints each device over SNMP, fetches its configuration with the
//! matching vendor driver, and commits whatever changed in a single commit
//! per run. One unreachable device never aborts the batch.

pub mod config;
pub mod dns;
pub mod driver;
pub mod engine;
pub mod error;
pub mod host;
pub mod transport;

pub use config::SyncConfig;
pub use dns::{DigZoneEnumerator, ZoneEnumerator, ZoneError};
pub use driver::Driver;
pub use engine::{
    AddOutcome, EngineSettings, HostOutcome, HostReport, ImportKind, ImportSummary, RunReport,
    SyncEngine,
};
pub use error::{HostError, SyncError};
pub use host::HostRecord;
pub use transport::{CommandTransport, DeviceTransport, TransportError};
