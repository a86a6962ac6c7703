//! Session key agreement.
//!
//! Two exchanges on the secure channel:
//!
//! 1. Key exchange: the first half of a fresh client nonce goes out under
//!    the offline key; the lock answers with its own 8-byte value, also
//!    under the offline key. The session key is the client half followed by
//!    the device value.
//! 2. Confirmation: the second nonce half goes out under the new session
//!    key and the lock must echo it back under the same key. The echo binds
//!    the reply to this nonce and proves both sides hold the same key.
//!
//! The offline key itself never crosses the link. The handshake is a
//! typestate: [`Handshake`] → [`PendingConfirmation`] → [`SessionKey`].

use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::BlockCipher;
use crate::frame::{open, seal, FrameError, RawFrame, SecureFrame, SecurePayload};
use crate::keys::{OfflineKeyMaterial, SessionKey};
use crate::wire::secure;

/// Why a handshake step was refused. Callers only ever see
/// `AuthenticationFailed`; the reason is logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake frame rejected: {0}")]
    Frame(#[from] FrameError),

    #[error("lock echoed a different client nonce")]
    EchoMismatch,
}

/// Random value chosen by the client for one handshake.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ClientNonce([u8; 16]);

impl ClientNonce {
    pub(crate) fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[cfg(test)]
    pub(crate) fn fixed(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    fn first_half(&self) -> SecurePayload {
        let mut half = [0u8; secure::PAYLOAD_LEN];
        half.copy_from_slice(&self.0[..secure::PAYLOAD_LEN]);
        half
    }

    fn second_half(&self) -> SecurePayload {
        let mut half = [0u8; secure::PAYLOAD_LEN];
        half.copy_from_slice(&self.0[secure::PAYLOAD_LEN..]);
        half
    }
}

/// First step: key exchange under the offline key.
pub(crate) struct Handshake<'a> {
    material: &'a OfflineKeyMaterial,
    offline: BlockCipher,
    nonce: ClientNonce,
}

impl<'a> Handshake<'a> {
    pub(crate) fn start(material: &'a OfflineKeyMaterial) -> Self {
        Self::with_nonce(material, ClientNonce::random())
    }

    pub(crate) fn with_nonce(material: &'a OfflineKeyMaterial, nonce: ClientNonce) -> Self {
        Self {
            material,
            offline: BlockCipher::new(material.key().as_bytes()),
            nonce,
        }
    }

    /// Sealed key-exchange request.
    pub(crate) fn request(&self) -> RawFrame {
        let frame = SecureFrame::new(secure::KEY_EXCHANGE, self.nonce.first_half(), self.material.slot());
        seal(&self.offline, frame.encode())
    }

    /// Validate the key-exchange reply and derive the session key.
    pub(crate) fn accept(self, reply: &[u8]) -> Result<PendingConfirmation, HandshakeError> {
        let frame = SecureFrame::decode(&open(&self.offline, reply)?)?;
        frame.expect_opcode(secure::KEY_EXCHANGE_REPLY)?;

        let session_key = SessionKey::derive(&self.nonce.first_half(), &frame.payload);
        debug!(slot = self.material.slot(), "key exchange accepted");
        Ok(PendingConfirmation {
            cipher: BlockCipher::new(session_key.as_bytes()),
            session_key,
            nonce: self.nonce,
            slot: self.material.slot(),
        })
    }
}

/// Second step: prove the lock derived the same session key.
pub(crate) struct PendingConfirmation {
    session_key: SessionKey,
    cipher: BlockCipher,
    nonce: ClientNonce,
    slot: u8,
}

impl PendingConfirmation {
    /// Sealed confirmation request.
    pub(crate) fn request(&self) -> RawFrame {
        let frame = SecureFrame::new(secure::CONFIRM, self.nonce.second_half(), self.slot);
        seal(&self.cipher, frame.encode())
    }

    /// Check the echoed nonce half and release the session key.
    pub(crate) fn finish(self, reply: &[u8]) -> Result<SessionKey, HandshakeError> {
        let frame = SecureFrame::decode(&open(&self.cipher, reply)?)?;
        frame.expect_opcode(secure::CONFIRM_REPLY)?;

        let mut expected = self.nonce.second_half();
        let matches = frame.payload == expected;
        expected.zeroize();
        if !matches {
            return Err(HandshakeError::EchoMismatch);
        }
        Ok(self.session_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::OfflineKey;

    const NONCE: [u8; 16] = [
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27,
    ];
    const DEVICE_VALUE: [u8; 8] = [0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7];

    fn material() -> OfflineKeyMaterial {
        OfflineKeyMaterial::new(OfflineKey::new([0x5a; 16]), 2)
    }

    /// Lock side of the exchange, built from the raw codec.
    fn lock_reply(key: &[u8; 16], opcode: u8, payload: SecurePayload) -> RawFrame {
        seal(&BlockCipher::new(key), SecureFrame::new(opcode, payload, 0).encode())
    }

    fn session_key_bytes() -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&NONCE[..8]);
        key[8..].copy_from_slice(&DEVICE_VALUE);
        key
    }

    #[test]
    fn test_request_carries_first_nonce_half_and_slot() {
        let material = material();
        let handshake = Handshake::with_nonce(&material, ClientNonce::fixed(NONCE));
        let sealed = handshake.request();
        assert_eq!(sealed[17], 2, "slot rides in the cleartext trailer");

        let opened = open(&BlockCipher::new(&[0x5a; 16]), &sealed).unwrap();
        let frame = SecureFrame::decode(&opened).unwrap();
        assert_eq!(frame.opcode, secure::KEY_EXCHANGE);
        assert_eq!(frame.payload, NONCE[..8]);
    }

    #[test]
    fn test_full_handshake_derives_expected_key() {
        let material = material();
        let handshake = Handshake::with_nonce(&material, ClientNonce::fixed(NONCE));
        let pending = handshake
            .accept(&lock_reply(&[0x5a; 16], secure::KEY_EXCHANGE_REPLY, DEVICE_VALUE))
            .unwrap();

        let confirm = open(&BlockCipher::new(&session_key_bytes()), &pending.request()).unwrap();
        let confirm = SecureFrame::decode(&confirm).unwrap();
        assert_eq!(confirm.opcode, secure::CONFIRM);
        assert_eq!(confirm.payload, NONCE[8..]);

        let mut echo = [0u8; 8];
        echo.copy_from_slice(&NONCE[8..]);
        let key = pending
            .finish(&lock_reply(&session_key_bytes(), secure::CONFIRM_REPLY, echo))
            .unwrap();
        assert_eq!(key.as_bytes(), &session_key_bytes());
    }

    #[test]
    fn test_wrong_echo_rejected() {
        let material = material();
        let pending = Handshake::with_nonce(&material, ClientNonce::fixed(NONCE))
            .accept(&lock_reply(&[0x5a; 16], secure::KEY_EXCHANGE_REPLY, DEVICE_VALUE))
            .unwrap();

        let result = pending.finish(&lock_reply(&session_key_bytes(), secure::CONFIRM_REPLY, [0xff; 8]));
        assert!(matches!(result, Err(HandshakeError::EchoMismatch)));
    }

    #[test]
    fn test_wrong_opcode_rejected() {
        let material = material();
        let result = Handshake::with_nonce(&material, ClientNonce::fixed(NONCE))
            .accept(&lock_reply(&[0x5a; 16], secure::CONFIRM_REPLY, DEVICE_VALUE));
        assert!(matches!(
            result,
            Err(HandshakeError::Frame(FrameError::Opcode { expected: 0x02, got: 0x04 }))
        ));
    }

    #[test]
    fn test_reply_under_wrong_key_rejected() {
        let material = material();
        let mut reply = lock_reply(&[0x5a; 16], secure::KEY_EXCHANGE_REPLY, DEVICE_VALUE);
        // Valid frame sealed under another key still fails to decode.
        reply[..16].copy_from_slice(&lock_reply(&[0x00; 16], secure::KEY_EXCHANGE_REPLY, DEVICE_VALUE)[..16]);
        let result = Handshake::with_nonce(&material, ClientNonce::fixed(NONCE)).accept(&reply);
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_nonces_differ() {
        let a = ClientNonce::random();
        let b = ClientNonce::random();
        assert_ne!(a.0, b.0);
    }
}
