//! lockctl server - HTTP facade for BLE smart locks
//!
//! Routes:
//! - `GET /api/status/{lock}`
//! - `GET /api/lock/{lock}`, `GET /api/unlock/{lock}`
//! - `GET /api/disconnect/{lock}`
//! - `GET /health`

#![forbid(unsafe_code)]

pub mod api;
pub mod cache;
pub mod registry;
pub mod server;

pub use api::{create_router, ApiResponse, AppState};
pub use registry::{BleLocator, LockRegistry, Locator};
pub use server::LockServer;
