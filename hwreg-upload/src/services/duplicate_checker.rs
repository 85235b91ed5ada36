//! Duplicate detection against the remote registry
//!
//! An indexed equality query answers most checks. When that query fails the
//! checker falls back to a bounded paginated scan; when the scan fails too,
//! the serial is reported as not found and submission proceeds.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::duplicate_check::{SOURCE_INDEXED, SOURCE_SCAN, SOURCE_UNAVAILABLE};
use crate::models::{serials_match, DuplicateCheckResult, ScanSettings};
use crate::services::registry_client::{DeviceRegistry, RegistryError};

pub struct DuplicateChecker {
    registry: Arc<dyn DeviceRegistry>,
    scan: ScanSettings,
}

impl DuplicateChecker {
    pub fn new(registry: Arc<dyn DeviceRegistry>, scan: ScanSettings) -> Self {
        Self { registry, scan }
    }

    /// Check whether `serial` is already registered
    ///
    /// Never fails: lookup errors degrade to `exists: false`.
    pub async fn check_serial(&self, serial: &str) -> DuplicateCheckResult {
        let serial = serial.trim();

        match self.registry.find_by_serial(serial).await {
            Ok(devices) => {
                let exists = !devices.is_empty();
                debug!(serial = %serial, exists, "Indexed duplicate check");
                if exists {
                    DuplicateCheckResult::found(serial, SOURCE_INDEXED)
                } else {
                    DuplicateCheckResult::not_found(serial, SOURCE_INDEXED)
                }
            }
            Err(e) => {
                debug!(serial = %serial, error = %e, "Indexed lookup failed, scanning registry");
                match self.scan_for(serial).await {
                    Ok(true) => DuplicateCheckResult::found(serial, SOURCE_SCAN),
                    Ok(false) => DuplicateCheckResult::not_found(serial, SOURCE_SCAN),
                    Err(e) => {
                        warn!(serial = %serial, error = %e, "Duplicate check unavailable, assuming not registered");
                        DuplicateCheckResult::not_found(serial, SOURCE_UNAVAILABLE)
                    }
                }
            }
        }
    }

    /// Page through the registry until a match or the page cap
    async fn scan_for(&self, serial: &str) -> Result<bool, RegistryError> {
        let mut next_link: Option<String> = None;

        for page_number in 0..self.scan.max_pages {
            let page = self
                .registry
                .list_page(self.scan.page_size, next_link.as_deref())
                .await?;

            if page
                .devices
                .iter()
                .any(|d| serials_match(&d.serial_number, serial))
            {
                debug!(serial = %serial, page = page_number + 1, "Serial found by scan");
                return Ok(true);
            }

            match page.next_link {
                Some(link) => next_link = Some(link),
                None => return Ok(false),
            }
        }

        debug!(serial = %serial, pages = self.scan.max_pages, "Scan page cap reached");
        Ok(false)
    }
}
