//! A device in the working set.

use confvault_core::{ConfigSnapshot, HostDescriptor};
use tokio::sync::OnceCell;

use crate::driver::{self, Driver};
use crate::error::HostError;
use crate::transport::DeviceTransport;

/// One device: its descriptor plus a driver resolved on first use.
///
/// The driver cell is set at most once; concurrent callers wait on the same
/// probe instead of issuing their own.
#[derive(Debug)]
pub struct HostRecord {
    descriptor: HostDescriptor,
    driver: OnceCell<Driver>,
}

impl HostRecord {
    pub fn new(descriptor: HostDescriptor) -> Self {
        Self {
            descriptor,
            driver: OnceCell::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.descriptor.hostname
    }

    pub fn descriptor(&self) -> &HostDescriptor {
        &self.descriptor
    }

    /// The cached driver, if resolution already happened.
    pub fn driver(&self) -> Option<Driver> {
        self.driver.get().copied()
    }

    /// Resolve (once) and return the driver for this host.
    ///
    /// A failed probe leaves the cell empty, so the next run fingerprints again.
    pub async fn resolve_driver(&self, transport: &dyn DeviceTransport) -> Result<Driver, HostError> {
        self.driver
            .get_or_try_init(|| driver::probe(&self.descriptor, transport))
            .await
            .copied()
    }

    /// Fetch the current configuration, resolving the driver first if needed.
    pub async fn fetch_config(
        &self,
        transport: &dyn DeviceTransport,
    ) -> Result<ConfigSnapshot, HostError> {
        let driver = self.resolve_driver(transport).await?;
        tracing::info!(host = %self.hostname(), %driver, "Fetching configuration");
        driver.fetch_config(&self.descriptor, transport).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::transport::TransportError;

    struct CountingTransport {
        sys_descr: &'static str,
        fingerprints: AtomicUsize,
    }

    #[async_trait]
    impl DeviceTransport for CountingTransport {
        async fn snmp_get(&self, _host: &HostDescriptor, oid: &str) -> Result<String, TransportError> {
            if oid == driver::SYS_DESCR_OID {
                self.fingerprints.fetch_add(1, Ordering::SeqCst);
            }
            Ok(self.sys_descr.to_string())
        }

        async fn scp_download(
            &self,
            _host: &HostDescriptor,
            _remote_path: &str,
        ) -> Result<Vec<u8>, TransportError> {
            Ok(b"hostname r1\nend\n".to_vec())
        }
    }

    #[tokio::test]
    async fn resolution_is_cached() {
        let transport = CountingTransport {
            sys_descr: "Cisco IOS Software",
            fingerprints: AtomicUsize::new(0),
        };
        let record = HostRecord::new(HostDescriptor::new("r1.example.com"));
        assert_eq!(record.driver(), None);

        assert_eq!(record.resolve_driver(&transport).await.unwrap(), Driver::Cisco);
        assert_eq!(record.resolve_driver(&transport).await.unwrap(), Driver::Cisco);
        record.fetch_config(&transport).await.unwrap();

        assert_eq!(transport.fingerprints.load(Ordering::SeqCst), 1);
        assert_eq!(record.driver(), Some(Driver::Cisco));
    }
}
