//! Integration tests for CLI operations against the simulated lock.

use lockctl_cli::{perform, ExitCode, Operation};
use lockctl_core::harness::{Faults, SimulatedLock};
use lockctl_core::{Command, Lock, LockStatus, OfflineKey, OfflineKeyMaterial};

const KEY: [u8; 16] = [0x3c; 16];

fn lock_for(device: &SimulatedLock) -> Lock<SimulatedLock> {
    Lock::new(device.clone(), OfflineKeyMaterial::new(OfflineKey::new(KEY), 2))
}

#[tokio::test]
async fn test_status_operation() {
    let device = SimulatedLock::new("sim", 2, KEY).with_status(LockStatus::Unlocked);
    let report = perform(&lock_for(&device), "front-door", Operation::Status).await.unwrap();

    assert_eq!(report.status, Some(LockStatus::Unlocked));
    assert_eq!(report.changed, None);
    assert!(!device.stats().link_open, "session closed after the operation");
}

#[tokio::test]
async fn test_unlock_is_idempotent() {
    let device = SimulatedLock::new("sim", 2, KEY).with_status(LockStatus::Locked);
    let lock = lock_for(&device);

    let first = perform(&lock, "front-door", Operation::Unlock).await.unwrap();
    assert_eq!(first.changed, Some(true));
    assert_eq!(first.message, "Unlocked as requested.");

    let second = perform(&lock, "front-door", Operation::Unlock).await.unwrap();
    assert_eq!(second.changed, Some(false));
    assert_eq!(device.status(), LockStatus::Unlocked);
}

#[tokio::test]
async fn test_force_lock_is_unconditional() {
    let device = SimulatedLock::new("sim", 2, KEY).with_status(LockStatus::Locked);
    let report = perform(&lock_for(&device), "garage", Operation::ForceLock).await.unwrap();

    assert_eq!(report.status, None);
    assert_eq!(device.stats().commands, vec![Command::ForceLock]);
}

#[tokio::test]
async fn test_failure_maps_to_exit_code() {
    let device = SimulatedLock::new("sim", 2, KEY).with_faults(Faults {
        wrong_nonce_echo: true,
        ..Faults::default()
    });
    let err = perform(&lock_for(&device), "garage", Operation::Status).await.unwrap_err();
    assert_eq!(ExitCode::from(&err), ExitCode::AuthenticationFailed);

    let device = SimulatedLock::new("sim", 2, KEY).with_faults(Faults {
        absent: true,
        ..Faults::default()
    });
    let err = perform(&lock_for(&device), "garage", Operation::Status).await.unwrap_err();
    assert_eq!(ExitCode::from(&err), ExitCode::ConnectionFailed);
}
