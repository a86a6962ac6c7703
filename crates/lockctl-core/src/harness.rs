//! In-memory lock for tests and dry runs.
//!
//! [`SimulatedLock`] speaks the lock's side of the frame protocol over a
//! [`Link`] without any radio. Replies are produced synchronously inside
//! `write`, so tests are deterministic. Faults can be injected to exercise
//! every failure path of the session engine.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::cipher::BlockCipher;
use crate::frame::{open, seal, CommandFrame, Direction, RawFrame, SecureFrame};
use crate::keys::SessionKey;
use crate::transport::{Channel, Link, Notification, NotificationStream, Peripheral, TransportError, NOTIFICATION_BUFFER};
use crate::types::{Command, LockStatus};
use crate::wire::{command, secure};

/// Notification sent when the simulated lock refuses a frame.
pub const REJECTION: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

/// Misbehaviours the simulated lock can be told to exhibit.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// `open` fails with `NotFound`.
    pub absent: bool,
    /// `open` never completes.
    pub stall_open: bool,
    /// Confirmation reply echoes the wrong nonce half.
    pub wrong_nonce_echo: bool,
    /// Command replies carry a broken checksum.
    pub tamper_checksum: bool,
    /// Command replies carry the wrong sequence number.
    pub wrong_sequence: bool,
    /// Command replies are sent on the secure channel.
    pub wrong_channel: bool,
    /// Never answer this command.
    pub swallow: Option<Command>,
    /// Drop the link instead of answering this command.
    pub drop_link_on: Option<Command>,
}

/// Counters observed by the simulated lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub opens: usize,
    pub writes: usize,
    pub terminates: usize,
    pub commands: Vec<Command>,
    pub sequences: Vec<u8>,
    pub link_open: bool,
}

enum Stage {
    Idle,
    KeyExchanged(SessionKey),
    Established(SessionKey),
}

struct Device {
    offline: BlockCipher,
    slot: u8,
    status: LockStatus,
    faults: Faults,
    stats: SimStats,
    stage: Stage,
    active_link: Option<u64>,
    next_link: u64,
}

/// A lock that lives in memory. Clones share the same device.
#[derive(Clone)]
pub struct SimulatedLock {
    address: String,
    device: Arc<Mutex<Device>>,
}

impl SimulatedLock {
    pub fn new(address: impl Into<String>, slot: u8, offline_key: [u8; 16]) -> Self {
        Self {
            address: address.into(),
            device: Arc::new(Mutex::new(Device {
                offline: BlockCipher::new(&offline_key),
                slot,
                status: LockStatus::Locked,
                faults: Faults::default(),
                stats: SimStats::default(),
                stage: Stage::Idle,
                active_link: None,
                next_link: 1,
            })),
        }
    }

    pub fn with_status(self, status: LockStatus) -> Self {
        self.set_status(status);
        self
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        self.device.lock().faults = faults;
        self
    }

    /// Move the bolt by hand.
    pub fn set_status(&self, status: LockStatus) {
        self.device.lock().status = status;
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut self.device.lock().faults);
    }

    /// Physical bolt state.
    pub fn status(&self) -> LockStatus {
        self.device.lock().status
    }

    pub fn stats(&self) -> SimStats {
        let device = self.device.lock();
        let mut stats = device.stats.clone();
        stats.link_open = device.active_link.is_some();
        stats
    }
}

#[async_trait]
impl Peripheral for SimulatedLock {
    type Link = SimLink;

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn open(&self) -> Result<SimLink, TransportError> {
        let stall = {
            let device = self.device.lock();
            if device.faults.absent {
                return Err(TransportError::NotFound(self.address.clone()));
            }
            device.faults.stall_open
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut device = self.device.lock();
        if device.active_link.is_some() {
            return Err(TransportError::Link("peripheral already connected".to_string()));
        }
        device.stats.opens += 1;
        let id = device.next_link;
        device.next_link += 1;
        device.active_link = Some(id);
        device.stage = Stage::Idle;
        drop(device);

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Ok(SimLink {
            id,
            device: Arc::clone(&self.device),
            tx: Some(tx),
            rx: Some(rx),
        })
    }
}

/// Link to a [`SimulatedLock`].
pub struct SimLink {
    id: u64,
    device: Arc<Mutex<Device>>,
    tx: Option<mpsc::Sender<Notification>>,
    rx: Option<NotificationStream>,
}

/// What the device does after handling a write.
enum Reply {
    Send(Channel, Vec<u8>),
    Silent,
    DropLink,
}

impl SimLink {
    fn release(&mut self) {
        self.tx = None;
        let mut device = self.device.lock();
        if device.active_link == Some(self.id) {
            device.active_link = None;
            device.stage = Stage::Idle;
        }
    }
}

impl Device {
    fn handle(&mut self, channel: Channel, bytes: &[u8]) -> Reply {
        self.stats.writes += 1;
        match channel {
            Channel::Secure => self.handle_secure(bytes),
            Channel::Command => self.handle_command(bytes),
        }
    }

    fn handle_secure(&mut self, bytes: &[u8]) -> Reply {
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Idle => {
                let request = match open(&self.offline, bytes).and_then(|f| SecureFrame::decode(&f)) {
                    Ok(request) if request.opcode == secure::KEY_EXCHANGE && request.slot == self.slot => request,
                    _ => return rejection(),
                };
                let device_value = [0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, self.stats.opens as u8];
                let session_key = SessionKey::derive(&request.payload, &device_value);
                let reply = SecureFrame::new(secure::KEY_EXCHANGE_REPLY, device_value, self.slot);
                let sealed = seal(&self.offline, reply.encode());
                self.stage = Stage::KeyExchanged(session_key);
                Reply::Send(Channel::Secure, sealed.to_vec())
            }
            Stage::KeyExchanged(session_key) => {
                let cipher = BlockCipher::new(session_key.as_bytes());
                let request = match open(&cipher, bytes).and_then(|f| SecureFrame::decode(&f)) {
                    Ok(request) if request.opcode == secure::CONFIRM => request,
                    _ => return rejection(),
                };
                let mut echo = request.payload;
                if self.faults.wrong_nonce_echo {
                    echo.iter_mut().for_each(|b| *b ^= 0xff);
                }
                let reply = SecureFrame::new(secure::CONFIRM_REPLY, echo, self.slot);
                self.stage = Stage::Established(session_key);
                Reply::Send(Channel::Secure, seal(&cipher, reply.encode()).to_vec())
            }
            Stage::Established(session_key) => {
                let cipher = BlockCipher::new(session_key.as_bytes());
                match open(&cipher, bytes).and_then(|f| SecureFrame::decode(&f)) {
                    Ok(request) if request.opcode == secure::TERMINATE => {
                        self.stats.terminates += 1;
                        Reply::Silent
                    }
                    _ => {
                        self.stage = Stage::Established(session_key);
                        rejection()
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, bytes: &[u8]) -> Reply {
        let Stage::Established(session_key) = &self.stage else {
            return rejection();
        };
        let cipher = BlockCipher::new(session_key.as_bytes());
        let request = match open(&cipher, bytes).and_then(|f| CommandFrame::decode(&f)) {
            Ok(request) if request.direction == Direction::Request => request,
            _ => return rejection(),
        };
        let Some(verb) = Command::from_opcode(request.opcode) else {
            return rejection();
        };
        self.stats.commands.push(verb);
        self.stats.sequences.push(request.sequence);
        trace!(command = %verb, sequence = request.sequence, "simulated lock received command");

        if self.faults.swallow == Some(verb) {
            return Reply::Silent;
        }
        if self.faults.drop_link_on == Some(verb) {
            return Reply::DropLink;
        }

        let mut payload = [0u8; command::PAYLOAD_LEN];
        match verb {
            Command::Status => {
                payload[command::STATUS_STATE_INDEX] = match self.status {
                    LockStatus::Locked => command::STATE_LOCKED,
                    LockStatus::Unlocked => command::STATE_UNLOCKED,
                    LockStatus::Unknown => 0x01,
                };
            }
            Command::ForceLock => self.status = LockStatus::Locked,
            Command::ForceUnlock => self.status = LockStatus::Unlocked,
        }

        let sequence = if self.faults.wrong_sequence {
            request.sequence.wrapping_add(1)
        } else {
            request.sequence
        };
        let mut frame: RawFrame = CommandFrame::response(request.opcode, sequence, payload).encode();
        if self.faults.tamper_checksum {
            frame[command::PAYLOAD_OFFSET + 11] ^= 0x01;
        }
        let channel = if self.faults.wrong_channel {
            Channel::Secure
        } else {
            Channel::Command
        };
        Reply::Send(channel, seal(&cipher, frame).to_vec())
    }
}

fn rejection() -> Reply {
    Reply::Send(Channel::Secure, REJECTION.to_vec())
}

#[async_trait]
impl Link for SimLink {
    async fn write(&mut self, channel: Channel, frame: &[u8]) -> Result<(), TransportError> {
        let Some(tx) = self.tx.clone() else {
            return Err(TransportError::Link("link closed".to_string()));
        };
        let reply = self.device.lock().handle(channel, frame);
        match reply {
            Reply::Send(channel, data) => {
                // Buffer overflow means nobody is reading; the lock would drop it too.
                let _ = tx.try_send(Notification { channel, data });
            }
            Reply::Silent => {}
            Reply::DropLink => {
                drop(tx);
                self.release();
            }
        }
        Ok(())
    }

    fn subscribe(&mut self) -> Result<NotificationStream, TransportError> {
        self.rx.take().ok_or(TransportError::AlreadySubscribed)
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_lock_not_found() {
        let sim = SimulatedLock::new("aa", 1, [0; 16]).with_faults(Faults {
            absent: true,
            ..Faults::default()
        });
        assert!(matches!(sim.open().await, Err(TransportError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_single_connection_only() {
        let sim = SimulatedLock::new("aa", 1, [0; 16]);
        let link = sim.open().await.unwrap();
        assert!(matches!(sim.open().await, Err(TransportError::Link(_))));
        drop(link);
        assert!(!sim.stats().link_open);
        assert!(sim.open().await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let sim = SimulatedLock::new("aa", 1, [0; 16]);
        let mut link = sim.open().await.unwrap();
        let mut notifications = link.subscribe().unwrap();
        link.write(Channel::Command, &[0u8; 18]).await.unwrap();
        let reply = notifications.recv().await.unwrap();
        assert_eq!(reply.data, REJECTION);
    }
}
