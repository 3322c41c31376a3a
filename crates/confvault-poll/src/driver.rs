//! Vendor drivers.
//!
//! A device is fingerprinted once by its SNMP `sysDescr`; the first matching
//! signature picks the driver, and anything unrecognized falls back to
//! [`Driver::Generic`].

use std::fmt;

use confvault_core::types::split_lines;
use confvault_core::{ConfigSnapshot, HostDescriptor};
use serde::Serialize;

use crate::error::HostError;
use crate::transport::{DeviceTransport, TransportError};

/// SNMPv2-MIB::sysDescr.0
pub const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";

/// The MIB-2 system group, as captured by the generic driver.
const SYSTEM_GROUP: &[(&str, &str)] = &[
    ("sysDescr", SYS_DESCR_OID),
    ("sysObjectID", "1.3.6.1.2.1.1.2.0"),
    ("sysContact", "1.3.6.1.2.1.1.4.0"),
    ("sysName", "1.3.6.1.2.1.1.5.0"),
    ("sysLocation", "1.3.6.1.2.1.1.6.0"),
];

/// Ordered vendor signatures; first substring match wins.
const SIGNATURES: &[(&str, Driver)] = &[
    ("Cisco", Driver::Cisco),
    ("NetScreen", Driver::ScreenOs),
    ("ScreenOS", Driver::ScreenOs),
    ("SSG", Driver::ScreenOs),
];

/// Lines IOS prepends or rewrites on every read, which would otherwise make
/// each poll look like a change.
const CISCO_VOLATILE_PREFIXES: &[&str] = &[
    "Building configuration",
    "Current configuration :",
    "! Last configuration change",
    "! NVRAM config last updated",
    "! No configuration change since last restart",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Unknown vendor: record the SNMP system group.
    Generic,
    /// Cisco IOS: running-config over SCP.
    Cisco,
    /// Juniper ScreenOS: `ns_sys_config` over SCP.
    ScreenOs,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generic => "generic",
            Self::Cisco => "cisco",
            Self::ScreenOs => "screenos",
        })
    }
}

/// Pick a driver from a `sysDescr` value.
pub fn match_signature(sys_descr: &str) -> Driver {
    SIGNATURES
        .iter()
        .find(|(needle, _)| sys_descr.contains(needle))
        .map(|(_, driver)| *driver)
        .unwrap_or(Driver::Generic)
}

/// Attach the host identity to a transport failure.
pub(crate) fn host_error(host: &HostDescriptor, operation: &str, err: TransportError) -> HostError {
    let host = host.hostname.clone();
    match err {
        TransportError::Timeout => HostError::Timeout {
            host,
            operation: operation.to_string(),
        },
        TransportError::Unreachable(reason) => HostError::Unreachable { host, reason },
        TransportError::Failed(reason) => HostError::NonFatal {
            host,
            reason: format!("{operation}: {reason}"),
        },
    }
}

/// Probe a device and pick its driver.
pub async fn probe(
    host: &HostDescriptor,
    transport: &dyn DeviceTransport,
) -> Result<Driver, HostError> {
    let sys_descr = transport
        .snmp_get(host, SYS_DESCR_OID)
        .await
        .map_err(|e| host_error(host, "SNMP GET sysDescr", e))?;

    let driver = match_signature(&sys_descr);
    tracing::debug!(host = %host.hostname, %driver, "Fingerprinted");
    Ok(driver)
}

impl Driver {
    /// Retrieve the device's configuration with this driver's transport.
    pub async fn fetch_config(
        &self,
        host: &HostDescriptor,
        transport: &dyn DeviceTransport,
    ) -> Result<ConfigSnapshot, HostError> {
        match self {
            Self::Generic => fetch_system_group(host, transport).await,
            Self::Cisco => {
                let raw = download(host, transport, "system:running-config").await?;
                let lines = split_lines(&raw)
                    .into_iter()
                    .filter(|l| !CISCO_VOLATILE_PREFIXES.iter().any(|p| l.starts_with(p)));
                Ok(ConfigSnapshot::new().with_file("running-config", lines))
            }
            Self::ScreenOs => {
                let raw = download(host, transport, "ns_sys_config").await?;
                let mut lines = split_lines(&raw);
                if !lines.is_empty() {
                    // Header comment carrying the save timestamp.
                    lines.remove(0);
                }
                Ok(ConfigSnapshot::new().with_file("config", lines))
            }
        }
    }
}

async fn download(
    host: &HostDescriptor,
    transport: &dyn DeviceTransport,
    remote_path: &str,
) -> Result<String, HostError> {
    let bytes = transport
        .scp_download(host, remote_path)
        .await
        .map_err(|e| host_error(host, &format!("SCP {remote_path}"), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn fetch_system_group(
    host: &HostDescriptor,
    transport: &dyn DeviceTransport,
) -> Result<ConfigSnapshot, HostError> {
    let mut lines = Vec::with_capacity(SYSTEM_GROUP.len());

    for (name, oid) in SYSTEM_GROUP {
        let value = transport
            .snmp_get(host, oid)
            .await
            .map_err(|e| host_error(host, &format!("SNMP GET {name}"), e))?;
        // Multi-line values (IOS sysDescr) are folded so one object stays one line.
        let value = split_lines(&value).join(" ");
        lines.push(format!("{name} = {value}"));
    }

    Ok(ConfigSnapshot::new().with_file("snmp-system", lines))
}
