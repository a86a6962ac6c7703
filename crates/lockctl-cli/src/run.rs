//! Operation execution, independent of the radio.

use lockctl_core::actions::{ensure_locked, ensure_unlocked, with_session};
use lockctl_core::transport::Peripheral;
use lockctl_core::{Lock, LockError, LockStatus};
use serde::Serialize;

use crate::cli::Operation;

/// Outcome of one CLI operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub lock: String,
    pub operation: Operation,
    /// Known bolt state afterwards. Absent for forced commands, which only
    /// report acceptance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LockStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    pub message: String,
}

/// Connect, run `operation`, disconnect.
pub async fn perform<P: Peripheral>(
    lock: &Lock<P>,
    name: &str,
    operation: Operation,
) -> Result<Report, LockError> {
    let report = |status: Option<LockStatus>, changed: Option<bool>, message: String| Report {
        lock: name.to_string(),
        operation,
        status,
        changed,
        message,
    };

    match operation {
        Operation::Status => {
            let status = with_session(lock, |l| l.status()).await?;
            Ok(report(Some(status), None, format!("Lock is {status}.")))
        }
        Operation::Lock | Operation::Unlock => {
            let outcome = if operation == Operation::Lock {
                with_session(lock, |l| ensure_locked(l)).await?
            } else {
                with_session(lock, |l| ensure_unlocked(l)).await?
            };
            Ok(report(Some(outcome.status), Some(outcome.changed), outcome.describe()))
        }
        Operation::ForceLock => {
            let ack = with_session(lock, |l| l.force_lock()).await?;
            Ok(report(None, None, format!("{} acknowledged.", ack.command)))
        }
        Operation::ForceUnlock => {
            let ack = with_session(lock, |l| l.force_unlock()).await?;
            Ok(report(None, None, format!("{} acknowledged.", ack.command)))
        }
    }
}
