//! lockctl BLE - btleplug transport for the lock session engine.
//!
//! [`scan`] finds a lock on the first adapter; the returned
//! [`BlePeripheral`] implements `lockctl_core::transport::Peripheral` and
//! opens into a [`BleLink`].

#![forbid(unsafe_code)]

pub mod scan;
pub mod peripheral;

pub use peripheral::{BleLink, BlePeripheral};
pub use scan::{matches_filter, normalize_address, scan};

use btleplug::Error as BtError;
use lockctl_core::transport::TransportError;
use uuid::Uuid;

use lockctl_core::wire;

pub(crate) fn uuid(value: u128) -> Uuid {
    Uuid::from_u128(value)
}

/// GATT service every lock advertises.
pub fn lock_service() -> Uuid {
    uuid(wire::LOCK_SERVICE)
}

pub(crate) fn transport_error(e: BtError) -> TransportError {
    match e {
        BtError::DeviceNotFound => TransportError::NotFound("device not found".to_string()),
        BtError::TimedOut(_) => TransportError::Timeout,
        other => TransportError::Link(other.to_string()),
    }
}
