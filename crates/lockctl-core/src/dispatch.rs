//! Command dispatch on an authenticated session.

use tracing::info;

use crate::errors::LockError;
use crate::session::Lock;
use crate::transport::Peripheral;
use crate::types::{Ack, Command, LockStatus};

impl<P: Peripheral> Lock<P> {
    /// Query the bolt state. Requires an authenticated session.
    pub async fn status(&self) -> Result<LockStatus, LockError> {
        let reply = self.execute(Command::Status).await?;
        let status = LockStatus::from_status_payload(&reply.payload);
        info!(lock = %self.address(), %status, "status");
        Ok(status)
    }

    /// Drive the bolt to locked regardless of its current state.
    pub async fn force_lock(&self) -> Result<Ack, LockError> {
        self.actuate(Command::ForceLock).await
    }

    /// Drive the bolt to unlocked regardless of its current state.
    pub async fn force_unlock(&self) -> Result<Ack, LockError> {
        self.actuate(Command::ForceUnlock).await
    }

    async fn actuate(&self, command: Command) -> Result<Ack, LockError> {
        let reply = self.execute(command).await?;
        info!(lock = %self.address(), %command, "acknowledged");
        Ok(Ack {
            command,
            sequence: reply.sequence,
        })
    }
}
