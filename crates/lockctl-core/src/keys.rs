//! Offline and session key material.
//!
//! Key bytes never leave this crate: they are reachable only through
//! crate-private accessors, are redacted in `Debug` output and are wiped
//! when dropped.

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wire::secure::PAYLOAD_LEN;

/// Length of an AES-128 key.
pub const KEY_LEN: usize = 16;

/// Errors raised while parsing key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("offline key is not valid hex")]
    InvalidHex,

    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// Long-lived symmetric secret shared with one lock.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OfflineKey([u8; KEY_LEN]);

impl OfflineKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the 32-character hex form used in configuration files.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let mut decoded = hex::decode(encoded.trim()).map_err(|_| KeyError::InvalidHex)?;
        if decoded.len() != KEY_LEN {
            let got = decoded.len();
            decoded.zeroize();
            return Err(KeyError::InvalidLength { expected: KEY_LEN, got });
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for OfflineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OfflineKey(<redacted>)")
    }
}

/// Offline key plus the slot the lock should validate it against.
#[derive(Clone)]
pub struct OfflineKeyMaterial {
    key: OfflineKey,
    slot: u8,
}

impl OfflineKeyMaterial {
    pub fn new(key: OfflineKey, slot: u8) -> Self {
        Self { key, slot }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub(crate) fn key(&self) -> &OfflineKey {
        &self.key
    }
}

impl fmt::Debug for OfflineKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineKeyMaterial")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Per-connection key agreed during the handshake.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Vendor transform: first client nonce half followed by the device value.
    ///
    /// Plain concatenation, with no extra block-cipher pass under the
    /// offline key. This pairs with the frame layout in [`crate::wire`]; if
    /// captures show a cipher step, change both together.
    pub(crate) fn derive(client_half: &[u8; PAYLOAD_LEN], device_value: &[u8; PAYLOAD_LEN]) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        bytes[..PAYLOAD_LEN].copy_from_slice(client_half);
        bytes[PAYLOAD_LEN..].copy_from_slice(device_value);
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_key_from_hex() {
        let key = OfflineKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[15], 0x0f);
    }

    #[test]
    fn test_offline_key_rejects_bad_input() {
        assert!(matches!(OfflineKey::from_hex("zz"), Err(KeyError::InvalidHex)));
        assert_eq!(
            OfflineKey::from_hex("0011").map(|_| ()),
            Err(KeyError::InvalidLength { expected: 16, got: 2 })
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let material = OfflineKeyMaterial::new(OfflineKey::new([0xAB; KEY_LEN]), 3);
        let rendered = format!("{material:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.to_lowercase().contains("ab, "));
        assert!(rendered.contains("slot: 3"));
    }

    #[test]
    fn test_session_key_layout() {
        let key = SessionKey::derive(&[1; 8], &[2; 8]);
        assert_eq!(&key.as_bytes()[..8], &[1; 8]);
        assert_eq!(&key.as_bytes()[8..], &[2; 8]);
    }
}
