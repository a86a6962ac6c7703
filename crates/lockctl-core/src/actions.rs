//! Caller-side policy built on the engine API.
//!
//! The engine only ever does what it is told; deciding whether a
//! `force_lock` is needed at all lives here.

use std::future::Future;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::LockError;
use crate::session::Lock;
use crate::transport::Peripheral;
use crate::types::LockStatus;

/// Result of an idempotent lock/unlock request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// Bolt state after the action. Reflects the acknowledged command, not a
    /// re-read of the bolt.
    pub status: LockStatus,
    /// Whether a command was sent.
    pub changed: bool,
}

impl ActionOutcome {
    pub fn describe(&self) -> String {
        match (self.changed, self.status) {
            (true, LockStatus::Locked) => "Locked as requested.".to_string(),
            (true, _) => "Unlocked as requested.".to_string(),
            (false, status) => format!("No change made. Lock was already '{status}'."),
        }
    }
}

/// Lock unless already locked. Requires an authenticated session.
pub async fn ensure_locked<P: Peripheral>(lock: &Lock<P>) -> Result<ActionOutcome, LockError> {
    match lock.status().await? {
        LockStatus::Unlocked => {
            lock.force_lock().await?;
            Ok(ActionOutcome {
                status: LockStatus::Locked,
                changed: true,
            })
        }
        status => Ok(unchanged(status)),
    }
}

/// Unlock unless already unlocked. Requires an authenticated session.
pub async fn ensure_unlocked<P: Peripheral>(lock: &Lock<P>) -> Result<ActionOutcome, LockError> {
    match lock.status().await? {
        LockStatus::Locked => {
            lock.force_unlock().await?;
            Ok(ActionOutcome {
                status: LockStatus::Unlocked,
                changed: true,
            })
        }
        status => Ok(unchanged(status)),
    }
}

fn unchanged(status: LockStatus) -> ActionOutcome {
    if status == LockStatus::Unknown {
        warn!("bolt state unknown, not actuating");
    } else {
        debug!(%status, "already in requested state");
    }
    ActionOutcome {
        status,
        changed: false,
    }
}

/// Connect, run `operation`, then disconnect whatever the outcome.
pub async fn with_session<'a, P, T, F, Fut>(lock: &'a Lock<P>, operation: F) -> Result<T, LockError>
where
    P: Peripheral,
    F: FnOnce(&'a Lock<P>) -> Fut,
    Fut: Future<Output = Result<T, LockError>>,
{
    lock.connect().await?;
    let result = operation(lock).await;
    lock.disconnect().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::SimulatedLock;
    use crate::keys::{OfflineKey, OfflineKeyMaterial};
    use crate::types::{Command, ConnectionState};

    const KEY: [u8; 16] = [0x42; 16];

    fn lock_for(device: &SimulatedLock) -> Lock<SimulatedLock> {
        Lock::new(device.clone(), OfflineKeyMaterial::new(OfflineKey::new(KEY), 1))
    }

    #[tokio::test]
    async fn test_ensure_locked_actuates_once() {
        let device = SimulatedLock::new("sim", 1, KEY).with_status(LockStatus::Unlocked);
        let lock = lock_for(&device);

        let first = with_session(&lock, |l| ensure_locked(l)).await.unwrap();
        assert_eq!(first, ActionOutcome { status: LockStatus::Locked, changed: true });

        let second = with_session(&lock, |l| ensure_locked(l)).await.unwrap();
        assert_eq!(second, ActionOutcome { status: LockStatus::Locked, changed: false });

        assert_eq!(
            device.stats().commands,
            vec![Command::Status, Command::ForceLock, Command::Status]
        );
    }

    #[tokio::test]
    async fn test_unknown_is_never_actuated() {
        let device = SimulatedLock::new("sim", 1, KEY).with_status(LockStatus::Unknown);
        let lock = lock_for(&device);

        let outcome = with_session(&lock, |l| ensure_unlocked(l)).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.status, LockStatus::Unknown);
        assert_eq!(device.status(), LockStatus::Unknown);
        assert_eq!(outcome.describe(), "No change made. Lock was already 'unknown'.");
    }

    #[tokio::test]
    async fn test_with_session_disconnects_on_error() {
        let device = SimulatedLock::new("sim", 1, KEY);
        let lock = lock_for(&device);

        let result: Result<(), _> = with_session(&lock, |_| async { Err(LockError::Timeout) }).await;
        assert_eq!(result, Err(LockError::Timeout));
        assert_eq!(lock.state(), ConnectionState::Disconnected);
        assert!(!device.stats().link_open);
    }
}
