//! Lock discovery.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use lockctl_core::transport::TransportError;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::peripheral::BlePeripheral;
use crate::{lock_service, transport_error};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Canonical form of a peripheral id or MAC address: lowercase hex digits
/// and letters only, separators dropped.
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether a discovered peripheral satisfies the configured filter.
pub fn matches_filter(filter: &str, id: &str, address: &str) -> bool {
    let wanted = normalize_address(filter);
    !wanted.is_empty() && (normalize_address(id) == wanted || normalize_address(address) == wanted)
}

async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await.map_err(transport_error)?;
    let adapters = manager.adapters().await.map_err(transport_error)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::NotFound("no Bluetooth adapter".to_string()))
}

/// Scan until a lock matching `filter` shows up, or the first lock at all
/// when `filter` is `None`.
pub async fn scan(filter: Option<&str>, timeout: Duration) -> Result<BlePeripheral, TransportError> {
    let adapter = first_adapter().await?;
    adapter
        .start_scan(ScanFilter {
            services: vec![lock_service()],
        })
        .await
        .map_err(transport_error)?;
    info!(filter = filter.unwrap_or("<any>"), "scanning for lock");

    let deadline = Instant::now() + timeout;
    let found = loop {
        if let Some(peripheral) = find_lock(&adapter, filter).await {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        sleep(POLL_INTERVAL).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!(error = %e, "failed to stop scan");
    }

    match found {
        Some(peripheral) => {
            let address = peripheral.address().to_string();
            info!(%address, "lock found");
            Ok(BlePeripheral::new(peripheral, address))
        }
        None => Err(TransportError::NotFound(
            filter.map_or_else(|| "no lock in range".to_string(), str::to_string),
        )),
    }
}

async fn find_lock(adapter: &Adapter, filter: Option<&str>) -> Option<Peripheral> {
    let peripherals = match adapter.peripherals().await {
        Ok(peripherals) => peripherals,
        Err(e) => {
            debug!(error = %e, "listing peripherals failed");
            return None;
        }
    };

    for peripheral in peripherals {
        let id = peripheral.id().to_string();
        let address = peripheral.address().to_string();
        match filter {
            Some(filter) => {
                if matches_filter(filter, &id, &address) {
                    return Some(peripheral);
                }
            }
            None => {
                let advertises_lock = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .map_or(false, |props| props.services.contains(&lock_service()));
                if advertises_lock {
                    return Some(peripheral);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_address(" aa-bb-cc-dd-ee-ff "), "aabbccddeeff");
    }

    #[test]
    fn test_matches_filter() {
        assert!(matches_filter("aa:bb:cc:dd:ee:ff", "hci0/dev_AA_BB", "AA:BB:CC:DD:EE:FF"));
        assert!(matches_filter("c0ffee", "C0FFEE", "00:00:00:00:00:00"));
        assert!(!matches_filter("aa:bb", "cc", "AA:BB:CC:DD:EE:FF"));
        assert!(!matches_filter("  ", "", ""));
    }

    proptest! {
        #[test]
        fn prop_separators_and_case_ignored(bytes in proptest::array::uniform6(any::<u8>())) {
            let colon = bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":");
            let dash = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join("-");
            prop_assert!(matches_filter(&dash, "unrelated-id", &colon));
        }
    }
}
