//! lockctl core - session engine for BLE smart locks.
//!
//! This crate implements:
//! - Frame codec for the secure and command channels
//! - Session key agreement with the offline key
//! - Session state machine with one exchange in flight
//! - Command dispatch (status, force-lock, force-unlock)
//! - Caller-side lock/unlock policy
//! - Shared configuration
//!
//! The physical radio is behind the [`transport`] traits; `lockctl-ble`
//! provides the real one and [`harness`] an in-memory lock for tests.

#![forbid(unsafe_code)]

// Protocol
pub mod wire;
pub mod frame;
mod cipher;
pub mod handshake;

// Engine
pub mod session;
pub mod dispatch;
pub mod actions;

// Supporting modules
pub mod errors;
pub mod types;
pub mod keys;
pub mod transport;
pub mod config;
pub mod harness;

pub use errors::LockError;
pub use keys::{OfflineKey, OfflineKeyMaterial};
pub use session::{Lock, LockOptions};
pub use types::{Ack, Command, ConnectionState, LockStatus};
