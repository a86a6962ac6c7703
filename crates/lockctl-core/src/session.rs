//! Session state machine.
//!
//! ```text
//! Disconnected → Connecting → HandshakeInFlight → Authenticated ⇄ Busy(command)
//!       ↑                                              |              |
//!       └──────────────────── Closing ←────────────────┴──────────────┘
//!                      (disconnect, or any failure)
//! ```
//!
//! One [`Lock`] owns at most one live link. The link and the session key
//! live inside the `Authenticated` slot; a command moves them out while
//! `Busy` and puts them back when the exchange completes. A second caller
//! therefore finds the slot `Busy` and gets `SessionBusy` instead of
//! touching the in-flight exchange.
//!
//! Every transition out of `Connecting`, `HandshakeInFlight` or `Busy` is
//! guarded by a [`Reservation`]. If the operation fails or its future is
//! dropped, the reservation returns the slot to `Disconnected`; the link
//! and session key are dropped with the operation.
//!
//! `Closing` covers the window in which a link is being shut down. The slot
//! only reads `Disconnected` once the link has been released, and
//! `disconnect()` does not return before then.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cipher::BlockCipher;
use crate::errors::LockError;
use crate::frame::{open, seal, CommandFrame, RawFrame, SecureFrame};
use crate::handshake::Handshake;
use crate::keys::{OfflineKeyMaterial, SessionKey};
use crate::transport::{Channel, Link, NotificationStream, Peripheral};
use crate::types::{Command, ConnectionState};
use crate::wire::secure;

/// Default bound on opening the link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on a single write/notify exchange.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing bounds for one lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockOptions {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Slot
// ============================================================================

enum Slot<L> {
    Disconnected,
    Connecting { ticket: u64 },
    HandshakeInFlight { ticket: u64 },
    Authenticated(Box<Established<L>>),
    Busy { command: Command, ticket: u64 },
    Closing { ticket: u64 },
}

impl<L> Slot<L> {
    fn state(&self) -> ConnectionState {
        match self {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::HandshakeInFlight { .. } => ConnectionState::HandshakeInFlight,
            Slot::Authenticated(_) => ConnectionState::Authenticated,
            Slot::Busy { command, .. } => ConnectionState::Busy(*command),
            Slot::Closing { .. } => ConnectionState::Closing,
        }
    }

    /// Ticket of the operation currently driving the slot forward.
    fn live_ticket(&self) -> Option<u64> {
        match self {
            Slot::Connecting { ticket } | Slot::HandshakeInFlight { ticket } | Slot::Busy { ticket, .. } => {
                Some(*ticket)
            }
            Slot::Disconnected | Slot::Authenticated(_) | Slot::Closing { .. } => None,
        }
    }

    /// Ticket of whoever owns the slot, including a link being closed.
    fn ticket(&self) -> Option<u64> {
        match self {
            Slot::Closing { ticket } => Some(*ticket),
            other => other.live_ticket(),
        }
    }
}

/// Claim on an in-progress transition. Dropping it unreleased forces the
/// slot back to `Disconnected` and wakes anyone waiting for the link to
/// close, unless someone else already replaced the slot.
///
/// Declare it before the link it guards so the link is gone first.
struct Reservation<'a, L> {
    slot: &'a Mutex<Slot<L>>,
    closed: &'a Notify,
    ticket: u64,
    released: bool,
}

impl<'a, L> Reservation<'a, L> {
    fn new(slot: &'a Mutex<Slot<L>>, closed: &'a Notify, ticket: u64) -> Self {
        Self {
            slot,
            closed,
            ticket,
            released: false,
        }
    }

    fn advance(&self, next: Slot<L>) {
        let mut slot = self.slot.lock();
        if slot.live_ticket() == Some(self.ticket) {
            *slot = next;
        }
    }

    /// Mark the link as shutting down before awaiting its close.
    fn closing(&self) {
        self.advance(Slot::Closing { ticket: self.ticket });
    }

    /// Install the established session. Hands it back if the reservation
    /// was revoked by a concurrent `disconnect()`; the caller closes it and
    /// the reservation finishes the teardown on drop.
    fn release(&mut self, established: Box<Established<L>>) -> Option<Box<Established<L>>> {
        let mut slot = self.slot.lock();
        if slot.live_ticket() == Some(self.ticket) {
            *slot = Slot::Authenticated(established);
            self.released = true;
            None
        } else {
            Some(established)
        }
    }
}

impl<L> Drop for Reservation<'_, L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut slot = self.slot.lock();
        if slot.ticket() == Some(self.ticket) {
            *slot = Slot::Disconnected;
            self.closed.notify_waiters();
        }
    }
}

// ============================================================================
// Established session
// ============================================================================

/// Authenticated link: the owned transport handle plus the session key.
/// Dropping it releases both.
pub(crate) struct Established<L> {
    link: L,
    notifications: NotificationStream,
    cipher: BlockCipher,
    _session_key: SessionKey,
    sequence: u32,
}

impl<L: Link> Established<L> {
    fn new(link: L, notifications: NotificationStream, session_key: SessionKey) -> Self {
        Self {
            link,
            notifications,
            cipher: BlockCipher::new(session_key.as_bytes()),
            _session_key: session_key,
            sequence: 0,
        }
    }

    async fn round_trip(&mut self, command: Command, wait: Duration) -> Result<CommandFrame, LockError> {
        self.sequence = self.sequence.wrapping_add(1);
        let request = CommandFrame::request(command.opcode(), self.sequence as u8, command.request_payload());
        debug!(%command, sequence = request.sequence, "sending command");

        let sealed = seal(&self.cipher, request.encode());
        let reply = exchange(&mut self.link, &mut self.notifications, Channel::Command, &sealed, wait).await?;
        let reply = CommandFrame::decode(&open(&self.cipher, &reply)?)?;
        reply.check_reply_to(&request)?;

        debug!(%command, sequence = reply.sequence, "command acknowledged");
        Ok(reply)
    }

    /// Best-effort session terminate so the lock frees its side early.
    async fn terminate(&mut self, slot: u8, wait: Duration) {
        let frame = seal(&self.cipher, SecureFrame::new(secure::TERMINATE, [0u8; 8], slot).encode());
        match timeout(wait, self.link.write(Channel::Secure, &frame)).await {
            Ok(Ok(())) => debug!("terminate sent"),
            Ok(Err(e)) => debug!(error = %e, "terminate not delivered"),
            Err(_) => debug!("terminate write timed out"),
        }
    }

    async fn close(&mut self) {
        self.link.close().await;
    }
}

/// Write one frame and wait for the single notification answering it.
async fn exchange<L: Link>(
    link: &mut L,
    notifications: &mut NotificationStream,
    channel: Channel,
    frame: &RawFrame,
    wait: Duration,
) -> Result<Vec<u8>, LockError> {
    let notification = timeout(wait, async {
        link.write(channel, frame).await.map_err(LockError::from)?;
        notifications
            .recv()
            .await
            .ok_or_else(|| LockError::Link("link dropped while awaiting response".to_string()))
    })
    .await
    .map_err(|_| LockError::Timeout)??;

    if notification.channel != channel {
        return Err(LockError::MalformedResponse(format!(
            "response arrived on {:?} channel, expected {:?}",
            notification.channel, channel
        )));
    }
    Ok(notification.data)
}

// ============================================================================
// Lock
// ============================================================================

/// Session engine for one physical lock.
///
/// Safe to share between tasks; the state machine admits one operation at
/// a time and rejects the rest with [`LockError::SessionBusy`].
pub struct Lock<P: Peripheral> {
    peripheral: P,
    material: OfflineKeyMaterial,
    options: LockOptions,
    slot: Mutex<Slot<P::Link>>,
    tickets: AtomicU64,
    /// Fired by `disconnect()` to abort an in-flight operation.
    teardown: Notify,
    /// Fired when a `Closing` slot reaches `Disconnected`.
    closed: Notify,
}

impl<P: Peripheral> Lock<P> {
    /// Bind a discovered peripheral to its offline key material.
    pub fn new(peripheral: P, material: OfflineKeyMaterial) -> Self {
        Self::with_options(peripheral, material, LockOptions::default())
    }

    pub fn with_options(peripheral: P, material: OfflineKeyMaterial, options: LockOptions) -> Self {
        Self {
            peripheral,
            material,
            options,
            slot: Mutex::new(Slot::Disconnected),
            tickets: AtomicU64::new(1),
            teardown: Notify::new(),
            closed: Notify::new(),
        }
    }

    pub fn address(&self) -> String {
        self.peripheral.address()
    }

    pub fn options(&self) -> LockOptions {
        self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state()
    }

    /// True only while `Authenticated` or `Busy`.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Authenticated | ConnectionState::Busy(_)
        )
    }

    /// Open the link and run the handshake.
    ///
    /// Returns immediately when already authenticated; fails with
    /// `SessionBusy` while another operation is in flight or the previous
    /// link is still closing.
    pub async fn connect(&self) -> Result<(), LockError> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let teardown = self.teardown.notified();
        tokio::pin!(teardown);
        {
            let mut slot = self.slot.lock();
            match slot.state() {
                ConnectionState::Disconnected => *slot = Slot::Connecting { ticket },
                ConnectionState::Authenticated => {
                    debug!(lock = %self.address(), "already authenticated");
                    return Ok(());
                }
                _ => return Err(LockError::SessionBusy),
            }
            teardown.as_mut().enable();
        }

        let mut reservation = Reservation::new(&self.slot, &self.closed, ticket);
        info!(lock = %self.address(), slot = self.material.slot(), "connecting");

        let opened = tokio::select! {
            opened = timeout(self.options.connect_timeout, self.peripheral.open()) => {
                opened.map_err(|_| LockError::Timeout).and_then(|r| r.map_err(LockError::from))
            }
            _ = &mut teardown => Err(LockError::Link("disconnected while connecting".to_string())),
        };
        let mut link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(lock = %self.address(), error = %e, "connect failed");
                return Err(e);
            }
        };

        let result = tokio::select! {
            result = self.authenticate(&reservation, &mut link) => result,
            _ = &mut teardown => Err(LockError::Link("disconnected while connecting".to_string())),
        };

        match result {
            Ok((notifications, session_key)) => {
                let established = Box::new(Established::new(link, notifications, session_key));
                if let Some(mut orphan) = reservation.release(established) {
                    orphan.close().await;
                    return Err(LockError::Link("disconnected while connecting".to_string()));
                }
                info!(lock = %self.address(), "authenticated");
                Ok(())
            }
            Err(e) => {
                warn!(lock = %self.address(), error = %e, "connect failed");
                reservation.closing();
                link.close().await;
                drop(link);
                drop(reservation);
                Err(e)
            }
        }
    }

    /// Subscribe and run the handshake on a freshly opened link.
    async fn authenticate(
        &self,
        reservation: &Reservation<'_, P::Link>,
        link: &mut P::Link,
    ) -> Result<(NotificationStream, SessionKey), LockError> {
        let mut notifications = link.subscribe()?;

        reservation.advance(Slot::HandshakeInFlight {
            ticket: reservation.ticket,
        });
        debug!(lock = %self.address(), "link open, starting handshake");

        let session_key = self.handshake(link, &mut notifications).await?;
        Ok((notifications, session_key))
    }

    async fn handshake(
        &self,
        link: &mut P::Link,
        notifications: &mut NotificationStream,
    ) -> Result<SessionKey, LockError> {
        let wait = self.options.response_timeout;
        let handshake = Handshake::start(&self.material);

        let reply = exchange(link, notifications, Channel::Secure, &handshake.request(), wait)
            .await
            .map_err(refused)?;
        let pending = handshake.accept(&reply).map_err(|e| {
            warn!(reason = %e, "key exchange rejected");
            LockError::from(e)
        })?;

        let reply = exchange(link, notifications, Channel::Secure, &pending.request(), wait)
            .await
            .map_err(refused)?;
        pending.finish(&reply).map_err(|e| {
            warn!(reason = %e, "session confirmation rejected");
            LockError::from(e)
        })
    }

    /// Run one command exchange. Reserves `Busy`, restores `Authenticated`
    /// on success and tears the session down on any failure.
    pub(crate) async fn execute(&self, command: Command) -> Result<CommandFrame, LockError> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let teardown = self.teardown.notified();
        tokio::pin!(teardown);
        let taken = {
            let mut slot = self.slot.lock();
            let taken = match slot.state() {
                ConnectionState::Authenticated => std::mem::replace(&mut *slot, Slot::Busy { command, ticket }),
                ConnectionState::Busy(_) => return Err(LockError::SessionBusy),
                _ => return Err(LockError::NotConnected),
            };
            teardown.as_mut().enable();
            taken
        };

        let mut reservation = Reservation::new(&self.slot, &self.closed, ticket);
        let Slot::Authenticated(mut established) = taken else {
            return Err(LockError::NotConnected);
        };

        let result = tokio::select! {
            result = established.round_trip(command, self.options.response_timeout) => result,
            _ = &mut teardown => Err(LockError::Link("disconnected while awaiting response".to_string())),
        };

        match result {
            Ok(reply) => {
                if let Some(mut orphan) = reservation.release(established) {
                    orphan.close().await;
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(lock = %self.address(), %command, error = %e, "command failed, dropping session");
                reservation.closing();
                established.close().await;
                drop(established);
                drop(reservation);
                Err(e)
            }
        }
    }

    /// Tear the session down. Valid from any state, idempotent, never fails.
    ///
    /// Returns once the link is released: an in-flight operation is aborted
    /// with a `Link` error and closes its link before this call completes.
    pub async fn disconnect(&self) {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut slot = self.slot.lock();
            match slot.state() {
                ConnectionState::Disconnected => {
                    debug!(lock = %self.address(), "already disconnected");
                    return;
                }
                ConnectionState::Authenticated => Some(std::mem::replace(&mut *slot, Slot::Closing { ticket })),
                ConnectionState::Closing => None,
                in_flight => {
                    debug!(lock = %self.address(), state = %in_flight, "cancelling in-flight operation");
                    if let Some(owner) = slot.live_ticket() {
                        *slot = Slot::Closing { ticket: owner };
                    }
                    self.teardown.notify_waiters();
                    None
                }
            }
        };

        // Only takes effect when this call put the slot into `Closing`.
        let reservation = Reservation::new(&self.slot, &self.closed, ticket);
        match previous {
            Some(Slot::Authenticated(mut established)) => {
                established.terminate(self.material.slot(), self.options.response_timeout).await;
                established.close().await;
                drop(established);
                drop(reservation);
                info!(lock = %self.address(), "disconnected");
            }
            _ => self.wait_closed().await,
        }
    }

    /// Wait until no link is being closed.
    async fn wait_closed(&self) {
        loop {
            let closed = self.closed.notified();
            tokio::pin!(closed);
            closed.as_mut().enable();
            let closing = matches!(*self.slot.lock(), Slot::Closing { .. });
            if !closing {
                return;
            }
            closed.await;
        }
    }
}

/// Handshake replies that fail to decode are an authentication failure.
fn refused(e: LockError) -> LockError {
    match e {
        LockError::MalformedResponse(reason) => {
            warn!(%reason, "handshake reply rejected");
            LockError::AuthenticationFailed
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::SimulatedLock;
    use crate::keys::OfflineKey;
    use crate::types::LockStatus;

    fn material() -> OfflineKeyMaterial {
        OfflineKeyMaterial::new(OfflineKey::new([0x11; 16]), 1)
    }

    #[test]
    fn test_starts_disconnected() {
        let lock = Lock::new(SimulatedLock::new("sim", 1, [0x11; 16]), material());
        assert_eq!(lock.state(), ConnectionState::Disconnected);
        assert!(!lock.is_connected());
    }

    #[test]
    fn test_reservation_drop_resets_slot() {
        let slot: Mutex<Slot<()>> = Mutex::new(Slot::Connecting { ticket: 9 });
        let closed = Notify::new();
        {
            let _reservation = Reservation::new(&slot, &closed, 9);
        }
        assert_eq!(slot.lock().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reservation_finishes_closing() {
        let slot: Mutex<Slot<()>> = Mutex::new(Slot::Busy {
            command: Command::Status,
            ticket: 4,
        });
        let closed = Notify::new();
        let reservation = Reservation::new(&slot, &closed, 4);
        reservation.closing();
        assert_eq!(slot.lock().state(), ConnectionState::Closing);

        // A closing slot is never moved forward again.
        reservation.advance(Slot::HandshakeInFlight { ticket: 4 });
        assert_eq!(slot.lock().state(), ConnectionState::Closing);

        drop(reservation);
        assert_eq!(slot.lock().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_reservation_leaves_slot_alone() {
        let slot: Mutex<Slot<()>> = Mutex::new(Slot::Connecting { ticket: 10 });
        let closed = Notify::new();
        {
            let _stale = Reservation::new(&slot, &closed, 9);
        }
        assert_eq!(slot.lock().state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_once_authenticated() {
        let device = SimulatedLock::new("sim", 1, [0x11; 16]).with_status(LockStatus::Locked);
        let lock = Lock::new(device.clone(), material());
        lock.connect().await.unwrap();
        lock.connect().await.unwrap();
        assert_eq!(device.stats().opens, 1);
        lock.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_sends_terminate_and_closes() {
        let device = SimulatedLock::new("sim", 1, [0x11; 16]);
        let lock = Lock::new(device.clone(), material());
        lock.connect().await.unwrap();
        lock.disconnect().await;

        let stats = device.stats();
        assert_eq!(stats.terminates, 1);
        assert!(!stats.link_open);
        assert_eq!(lock.state(), ConnectionState::Disconnected);

        // Second call is a no-op.
        lock.disconnect().await;
        assert_eq!(device.stats().terminates, 1);
    }
}
