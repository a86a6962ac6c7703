//! Device wire table.
//!
//! GATT identifiers, frame geometry and opcodes for the reference lock
//! family. Everything that is fixed by the lock firmware lives here so a
//! differently versioned table can replace it without touching the codec or
//! the session engine.

/// Total width of every frame on either channel.
pub const FRAME_LEN: usize = 18;

/// Width of the encrypted part of a frame (one AES block).
pub const BLOCK_LEN: usize = 16;

/// Width of the cleartext trailer following the encrypted block.
pub const TRAILER_LEN: usize = FRAME_LEN - BLOCK_LEN;

// ============================================================================
// GATT
// ============================================================================

/// Primary service advertised by the lock.
pub const LOCK_SERVICE: u128 = 0xbd4a_c610_0b45_11e3_8ffd_0800_200c_9a66;

/// Command channel, client to lock.
pub const COMMAND_WRITE: u128 = 0xbd4a_c611_0b45_11e3_8ffd_0800_200c_9a66;

/// Command channel, lock to client.
pub const COMMAND_NOTIFY: u128 = 0xbd4a_c612_0b45_11e3_8ffd_0800_200c_9a66;

/// Secure (handshake) channel, client to lock.
pub const SECURE_WRITE: u128 = 0xbd4a_c613_0b45_11e3_8ffd_0800_200c_9a66;

/// Secure (handshake) channel, lock to client.
pub const SECURE_NOTIFY: u128 = 0xbd4a_c614_0b45_11e3_8ffd_0800_200c_9a66;

// ============================================================================
// Secure channel
// ============================================================================

/// Secure channel layout and opcodes.
pub mod secure {
    /// Client nonce half, offline key.
    pub const KEY_EXCHANGE: u8 = 0x01;
    /// Device value, offline key.
    pub const KEY_EXCHANGE_REPLY: u8 = 0x02;
    /// Second client nonce half, session key.
    pub const CONFIRM: u8 = 0x03;
    /// Echo of the second nonce half, session key.
    pub const CONFIRM_REPLY: u8 = 0x04;
    /// Ends the session on the lock side.
    pub const TERMINATE: u8 = 0x05;

    /// Offset of the 8-byte payload.
    pub const PAYLOAD_OFFSET: usize = 0x04;
    /// Width of the payload.
    pub const PAYLOAD_LEN: usize = 8;
    /// Offset of the little-endian u32 security checksum.
    pub const CHECKSUM_OFFSET: usize = 0x0c;
    /// First trailer byte.
    pub const TRAILER_TAG: u8 = 0x0f;
}

// ============================================================================
// Command channel
// ============================================================================

/// Command channel layout and opcodes.
pub mod command {
    /// First byte of every client request.
    pub const REQUEST_MAGIC: u8 = 0xee;
    /// First byte of every lock response.
    pub const RESPONSE_MAGIC: u8 = 0xbb;

    pub const GET_STATUS: u8 = 0x02;
    pub const FORCE_UNLOCK: u8 = 0x0a;
    pub const FORCE_LOCK: u8 = 0x0b;

    /// Status query selector for the bolt state.
    pub const STATUS_SELECTOR_BOLT: u8 = 0x02;

    pub const OPCODE_OFFSET: usize = 0x01;
    pub const SEQUENCE_OFFSET: usize = 0x02;
    pub const CHECKSUM_OFFSET: usize = 0x03;
    pub const PAYLOAD_OFFSET: usize = 0x04;
    /// Payload runs up to the end of the encrypted block.
    pub const PAYLOAD_LEN: usize = 12;

    /// Cleartext trailer carried by every command frame.
    pub const TRAILER: [u8; 2] = [0x02, 0x00];

    /// Index of the bolt state inside a status reply payload (frame offset 0x08).
    pub const STATUS_STATE_INDEX: usize = 4;
    pub const STATE_UNLOCKED: u8 = 0x03;
    pub const STATE_LOCKED: u8 = 0x05;
}
