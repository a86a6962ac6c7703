//! Transport capability consumed by the session engine.
//!
//! The engine never talks to a BLE library directly. A [`Peripheral`] is a
//! discovered device that can be opened into a [`Link`]; the link is an
//! owned, move-only handle to the single physical connection the lock
//! accepts.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered notifications per link before the producer applies backpressure.
pub const NOTIFICATION_BUFFER: usize = 16;

/// Logical channel a frame travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Handshake and session control.
    Secure,
    /// Encrypted lock commands.
    Command,
}

/// One notified byte block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub channel: Channel,
    pub data: Vec<u8>,
}

/// Notifications of one link. Yields `None` once the link drops.
pub type NotificationStream = mpsc::Receiver<Notification>;

/// Transport-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peripheral not found: {0}")]
    NotFound(String),

    #[error("transport operation timed out")]
    Timeout,

    #[error("link failure: {0}")]
    Link(String),

    #[error("notifications already subscribed on this link")]
    AlreadySubscribed,
}

/// A discovered lock that can be connected to.
#[async_trait]
pub trait Peripheral: Send + Sync + 'static {
    type Link: Link;

    /// Identifier used in logs.
    fn address(&self) -> String;

    /// Establish the physical link.
    async fn open(&self) -> Result<Self::Link, TransportError>;
}

/// An open connection to a lock.
///
/// Dropping a link without calling [`Link::close`] must still release the
/// physical connection.
#[async_trait]
pub trait Link: Send + 'static {
    /// Write one frame to the channel's ingress characteristic.
    async fn write(&mut self, channel: Channel, frame: &[u8]) -> Result<(), TransportError>;

    /// Take the notification stream. Only the first call succeeds.
    fn subscribe(&mut self) -> Result<NotificationStream, TransportError>;

    /// Release the link. Idempotent.
    async fn close(&mut self);
}
