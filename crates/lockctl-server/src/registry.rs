//! Named locks owned by the server.
//!
//! Each configured lock is located (scanned for) in the background. Once
//! found it gets one shared [`Lock`] plus a gate that serializes requests
//! to it, so concurrent HTTP calls queue instead of hitting `SessionBusy`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use lockctl_core::config::{Config, LockEntry};
use lockctl_core::transport::Peripheral;
use lockctl_core::{Lock, LockError, LockOptions};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Finds the peripheral for a configured lock.
#[async_trait]
pub trait Locator: Send + Sync + 'static {
    type Peripheral: Peripheral;

    async fn locate(&self, name: &str, entry: &LockEntry) -> Result<Self::Peripheral, LockError>;
}

/// Locator backed by a BLE scan.
pub struct BleLocator {
    scan_timeout: Duration,
}

impl BleLocator {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }
}

#[async_trait]
impl Locator for BleLocator {
    type Peripheral = lockctl_ble::BlePeripheral;

    async fn locate(&self, _name: &str, entry: &LockEntry) -> Result<Self::Peripheral, LockError> {
        lockctl_ble::scan(entry.address_filter(), self.scan_timeout)
            .await
            .map_err(LockError::from)
    }
}

/// A located lock and the gate serializing access to it.
pub struct ManagedLock<P: Peripheral> {
    pub lock: Lock<P>,
    pub gate: Mutex<()>,
}

/// Result of looking a lock up by name.
pub enum Lookup<P: Peripheral> {
    Ready(Arc<ManagedLock<P>>),
    /// Configured but not found yet.
    Locating,
    Unconfigured,
}

pub struct LockRegistry<L: Locator> {
    entries: BTreeMap<String, LockEntry>,
    options: LockOptions,
    locator: L,
    located: DashMap<String, Arc<ManagedLock<L::Peripheral>>>,
    in_progress: DashSet<String>,
}

impl<L: Locator> LockRegistry<L> {
    pub fn new(config: &Config, locator: L) -> Self {
        Self {
            entries: config.locks.clone(),
            options: config.timeouts.lock_options(),
            locator,
            located: DashMap::new(),
            in_progress: DashSet::new(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn lookup(&self, name: &str) -> Lookup<L::Peripheral> {
        if let Some(managed) = self.located.get(name) {
            return Lookup::Ready(Arc::clone(managed.value()));
        }
        if self.entries.contains_key(name) {
            Lookup::Locating
        } else {
            Lookup::Unconfigured
        }
    }

    /// Scan for `name` and register it.
    pub async fn locate_now(&self, name: &str) -> Result<(), LockError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| LockError::NotFound(format!("lock '{name}' is not configured")))?;
        let material = entry
            .key_material()
            .map_err(|e| LockError::NotFound(format!("lock '{name}': {e}")))?;

        let peripheral = self.locator.locate(name, entry).await?;
        let lock = Lock::with_options(peripheral, material, self.options);
        info!(lock = name, address = %lock.address(), "lock located");

        self.located.insert(
            name.to_string(),
            Arc::new(ManagedLock {
                lock,
                gate: Mutex::new(()),
            }),
        );
        Ok(())
    }

    /// Start locating `name` in the background unless already located or
    /// a search is running.
    pub fn locate(self: &Arc<Self>, name: &str) {
        if self.located.contains_key(name) || !self.entries.contains_key(name) {
            return;
        }
        if !self.in_progress.insert(name.to_string()) {
            return;
        }

        let registry = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = registry.locate_now(&name).await {
                warn!(lock = %name, error = %e, "failed to locate lock");
            }
            registry.in_progress.remove(&name);
        });
    }

    pub fn locate_all(self: &Arc<Self>) {
        for name in self.entries.keys() {
            info!(lock = %name, "loading config for lock");
            self.locate(name);
        }
    }
}
