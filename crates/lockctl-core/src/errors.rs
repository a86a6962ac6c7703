//! Error taxonomy of the lock session engine.

use thiserror::Error;

use crate::frame::FrameError;
use crate::handshake::HandshakeError;
use crate::transport::TransportError;

/// Every failure the engine surfaces to callers.
///
/// All variants except [`LockError::SessionBusy`] and
/// [`LockError::NotConnected`] leave the session `Disconnected` with its
/// session key discarded. The engine never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Peripheral could not be discovered or connected to.
    #[error("lock not found: {0}")]
    NotFound(String),

    /// No correlated response within the bound.
    #[error("timed out waiting for the lock")]
    Timeout,

    /// Handshake key or nonce mismatch.
    #[error("authentication with the lock failed")]
    AuthenticationFailed,

    /// Checksum, sequence or opcode mismatch after decryption.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A command is already in flight on this session.
    #[error("session busy: another command is in flight")]
    SessionBusy,

    /// Command issued outside an authenticated session.
    #[error("not connected to the lock")]
    NotConnected,

    /// Transport-level failure.
    #[error("link error: {0}")]
    Link(String),
}

impl LockError {
    /// Whether this error tore the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LockError::SessionBusy | LockError::NotConnected)
    }
}

impl From<TransportError> for LockError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotFound(what) => LockError::NotFound(what),
            TransportError::Timeout => LockError::Timeout,
            TransportError::Link(reason) => LockError::Link(reason),
            TransportError::AlreadySubscribed => LockError::Link(e.to_string()),
        }
    }
}

impl From<FrameError> for LockError {
    fn from(e: FrameError) -> Self {
        LockError::MalformedResponse(e.to_string())
    }
}

impl From<HandshakeError> for LockError {
    fn from(_: HandshakeError) -> Self {
        LockError::AuthenticationFailed
    }
}
