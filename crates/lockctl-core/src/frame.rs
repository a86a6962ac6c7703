//! Fixed-width frame codec.
//!
//! Frames are 18 bytes: one AES block carrying the tagged layout followed
//! by a two-byte cleartext trailer. Encoding always produces the full
//! width, so there is no padding to strip on decode. Encryption is a
//! separate step ([`seal`] / [`open`]) so the same layouts serve the
//! handshake (offline key) and the command phase (session key).

use thiserror::Error;

use crate::cipher::BlockCipher;
use crate::wire::{command, secure, FRAME_LEN};

/// One frame on the wire, before encryption or after decryption.
pub type RawFrame = [u8; FRAME_LEN];

/// Payload carried by a secure-channel frame.
pub type SecurePayload = [u8; secure::PAYLOAD_LEN];

/// Payload carried by a command-channel frame.
pub type CommandPayload = [u8; command::PAYLOAD_LEN];

/// Frame codec errors. Every variant means the frame must not be
/// interpreted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is {0} bytes, expected {FRAME_LEN}")]
    Length(usize),

    #[error("checksum mismatch")]
    Checksum,

    #[error("unexpected magic byte {0:#04x}")]
    Magic(u8),

    #[error("unexpected opcode {got:#04x}, expected {expected:#04x}")]
    Opcode { expected: u8, got: u8 },

    #[error("sequence mismatch: sent {expected}, received {got}")]
    Sequence { expected: u8, got: u8 },

    #[error("frame is a request, expected a response")]
    Direction,
}

/// Encrypt a plaintext frame.
pub(crate) fn seal(cipher: &BlockCipher, mut frame: RawFrame) -> RawFrame {
    cipher.seal(&mut frame);
    frame
}

/// Length-check and decrypt received bytes.
pub(crate) fn open(cipher: &BlockCipher, bytes: &[u8]) -> Result<RawFrame, FrameError> {
    let mut frame = RawFrame::try_from(bytes).map_err(|_| FrameError::Length(bytes.len()))?;
    cipher.open(&mut frame);
    Ok(frame)
}

// ============================================================================
// Secure channel frames
// ============================================================================

/// Word checksum over the first twelve bytes: the three little-endian words
/// plus the checksum sum to zero.
pub fn security_checksum(frame: &RawFrame) -> u32 {
    let word = |at: usize| u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
    0u32.wrapping_sub(word(0x00).wrapping_add(word(0x04)).wrapping_add(word(0x08)))
}

/// Handshake-phase frame: `{opcode, payload, checksum}` plus the key slot
/// in the trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecureFrame {
    pub opcode: u8,
    pub payload: SecurePayload,
    pub slot: u8,
}

impl SecureFrame {
    pub fn new(opcode: u8, payload: SecurePayload, slot: u8) -> Self {
        Self { opcode, payload, slot }
    }

    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.opcode;
        frame[secure::PAYLOAD_OFFSET..secure::CHECKSUM_OFFSET].copy_from_slice(&self.payload);
        let checksum = security_checksum(&frame);
        frame[secure::CHECKSUM_OFFSET..secure::CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        frame[16] = secure::TRAILER_TAG;
        frame[17] = self.slot;
        frame
    }

    pub fn decode(frame: &RawFrame) -> Result<Self, FrameError> {
        let at = secure::CHECKSUM_OFFSET;
        let carried = u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
        if carried != security_checksum(frame) {
            return Err(FrameError::Checksum);
        }

        let mut payload = [0u8; secure::PAYLOAD_LEN];
        payload.copy_from_slice(&frame[secure::PAYLOAD_OFFSET..secure::CHECKSUM_OFFSET]);
        Ok(Self {
            opcode: frame[0],
            payload,
            slot: frame[17],
        })
    }

    pub fn expect_opcode(&self, expected: u8) -> Result<(), FrameError> {
        if self.opcode != expected {
            return Err(FrameError::Opcode {
                expected,
                got: self.opcode,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Command channel frames
// ============================================================================

/// Byte checksum: two's complement of the sum of every other byte, so the
/// whole frame sums to zero.
pub fn simple_checksum(frame: &RawFrame) -> u8 {
    let sum = frame
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != command::CHECKSUM_OFFSET)
        .fold(0u8, |acc, (_, b)| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Which side produced a command frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn magic(self) -> u8 {
        match self {
            Direction::Request => command::REQUEST_MAGIC,
            Direction::Response => command::RESPONSE_MAGIC,
        }
    }
}

/// Command-phase frame: `{opcode, sequence, payload, checksum}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandFrame {
    pub direction: Direction,
    pub opcode: u8,
    pub sequence: u8,
    pub payload: CommandPayload,
}

impl CommandFrame {
    pub fn request(opcode: u8, sequence: u8, payload: CommandPayload) -> Self {
        Self {
            direction: Direction::Request,
            opcode,
            sequence,
            payload,
        }
    }

    pub fn response(opcode: u8, sequence: u8, payload: CommandPayload) -> Self {
        Self {
            direction: Direction::Response,
            opcode,
            sequence,
            payload,
        }
    }

    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.direction.magic();
        frame[command::OPCODE_OFFSET] = self.opcode;
        frame[command::SEQUENCE_OFFSET] = self.sequence;
        frame[command::PAYLOAD_OFFSET..command::PAYLOAD_OFFSET + command::PAYLOAD_LEN]
            .copy_from_slice(&self.payload);
        frame[16..].copy_from_slice(&command::TRAILER);
        frame[command::CHECKSUM_OFFSET] = simple_checksum(&frame);
        frame
    }

    pub fn decode(frame: &RawFrame) -> Result<Self, FrameError> {
        if frame[command::CHECKSUM_OFFSET] != simple_checksum(frame) {
            return Err(FrameError::Checksum);
        }

        let direction = match frame[0] {
            command::REQUEST_MAGIC => Direction::Request,
            command::RESPONSE_MAGIC => Direction::Response,
            other => return Err(FrameError::Magic(other)),
        };

        let mut payload = [0u8; command::PAYLOAD_LEN];
        payload.copy_from_slice(&frame[command::PAYLOAD_OFFSET..command::PAYLOAD_OFFSET + command::PAYLOAD_LEN]);
        Ok(Self {
            direction,
            opcode: frame[command::OPCODE_OFFSET],
            sequence: frame[command::SEQUENCE_OFFSET],
            payload,
        })
    }

    /// Correlate a decoded reply with the outstanding request.
    pub fn check_reply_to(&self, request: &CommandFrame) -> Result<(), FrameError> {
        if self.direction != Direction::Response {
            return Err(FrameError::Direction);
        }
        if self.sequence != request.sequence {
            return Err(FrameError::Sequence {
                expected: request.sequence,
                got: self.sequence,
            });
        }
        if self.opcode != request.opcode {
            return Err(FrameError::Opcode {
                expected: request.opcode,
                got: self.opcode,
            });
        }
        Ok(())
    }
}
