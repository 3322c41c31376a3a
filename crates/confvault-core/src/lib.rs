//! confvault-core: Shared types and host-spec parsing for confvault.
//!
//! This crate provides the foundational types used by the store and the
//! poller:
//! - Host descriptors with credentials and SNMP options
//! - Configuration snapshots (named files of normalized lines)
//! - The `[user[:pass]@]hostname` parser and text/CSV importers
//! - Common error types and process exit codes

pub mod error;
pub mod hostspec;
pub mod types;

pub use error::ParseError;
pub use types::{ConfigSnapshot, HostDescriptor, SnmpOptions, SnmpOverrides, SnmpVersion};

/// Exit status for invalid arguments, configuration, or repository failures.
pub const ARGUMENT_ERROR: i32 = 1;

/// Exit status reserved for runs that ended with a non-fatal error.
pub const NONFATAL_ERROR: i32 = 255;
