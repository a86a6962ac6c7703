//! Public value types of the engine API.

use std::fmt;

use serde::Serialize;

use crate::frame::CommandPayload;
use crate::wire::command;

/// Bolt state reported by the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Locked,
    Unlocked,
    Unknown,
}

impl LockStatus {
    /// Decode the payload of a status reply.
    pub fn from_status_payload(payload: &CommandPayload) -> Self {
        match payload[command::STATUS_STATE_INDEX] {
            command::STATE_LOCKED => LockStatus::Locked,
            command::STATE_UNLOCKED => LockStatus::Unlocked,
            _ => LockStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "locked",
            LockStatus::Unlocked => "unlocked",
            LockStatus::Unknown => "unknown",
        }
    }

    /// Numeric form used by the HTTP façade: 0 locked, 1 unlocked, -1 unknown.
    pub fn code(&self) -> i32 {
        match self {
            LockStatus::Locked => 0,
            LockStatus::Unlocked => 1,
            LockStatus::Unknown => -1,
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command verbs understood by the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Status,
    ForceLock,
    ForceUnlock,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Status => command::GET_STATUS,
            Command::ForceLock => command::FORCE_LOCK,
            Command::ForceUnlock => command::FORCE_UNLOCK,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            command::GET_STATUS => Some(Command::Status),
            command::FORCE_LOCK => Some(Command::ForceLock),
            command::FORCE_UNLOCK => Some(Command::ForceUnlock),
            _ => None,
        }
    }

    pub(crate) fn request_payload(&self) -> CommandPayload {
        let mut payload = [0u8; command::PAYLOAD_LEN];
        if let Command::Status = self {
            payload[0] = command::STATUS_SELECTOR_BOLT;
        }
        payload
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Status => f.write_str("status"),
            Command::ForceLock => f.write_str("force-lock"),
            Command::ForceUnlock => f.write_str("force-unlock"),
        }
    }
}

/// Acknowledgement of an actuation command. Says the lock accepted the
/// command, not that the bolt has finished moving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub command: Command,
    pub sequence: u8,
}

/// Observable session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeInFlight,
    Authenticated,
    Busy(Command),
    /// The link is being shut down.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::HandshakeInFlight => f.write_str("handshake in flight"),
            ConnectionState::Authenticated => f.write_str("authenticated"),
            ConnectionState::Busy(command) => write!(f, "busy ({command})"),
            ConnectionState::Closing => f.write_str("closing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_decoding() {
        let mut payload = [0u8; 12];
        payload[4] = 0x05;
        assert_eq!(LockStatus::from_status_payload(&payload), LockStatus::Locked);
        payload[4] = 0x03;
        assert_eq!(LockStatus::from_status_payload(&payload), LockStatus::Unlocked);
        payload[4] = 0x01;
        assert_eq!(LockStatus::from_status_payload(&payload), LockStatus::Unknown);
    }

    #[test]
    fn test_opcode_mapping() {
        for command in [Command::Status, Command::ForceLock, Command::ForceUnlock] {
            assert_eq!(Command::from_opcode(command.opcode()), Some(command));
        }
        assert_eq!(Command::from_opcode(0x7f), None);
    }
}
