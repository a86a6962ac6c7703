//! Single-block AES-128 used for both handshake and command frames.
//!
//! Only the first block of a frame is encrypted; the trailer stays in the
//! clear. With one block per frame, ECB and the CBC/zero-IV mode the lock
//! firmware uses produce identical ciphertext.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::keys::KEY_LEN;
use crate::wire::{BLOCK_LEN, FRAME_LEN};

/// Frame-sized block cipher. Round keys are wiped on drop.
pub(crate) struct BlockCipher {
    inner: Aes128,
}

impl BlockCipher {
    pub(crate) fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            inner: Aes128::new(GenericArray::from_slice(key)),
        }
    }

    /// Encrypt the leading block of `frame` in place.
    pub(crate) fn seal(&self, frame: &mut [u8; FRAME_LEN]) {
        let block = GenericArray::from_mut_slice(&mut frame[..BLOCK_LEN]);
        self.inner.encrypt_block(block);
    }

    /// Decrypt the leading block of `frame` in place.
    pub(crate) fn open(&self, frame: &mut [u8; FRAME_LEN]) {
        let block = GenericArray::from_mut_slice(&mut frame[..BLOCK_LEN]);
        self.inner.decrypt_block(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 appendix C.1
    const KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    ];
    const PLAINTEXT: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
    ];
    const CIPHERTEXT: [u8; 16] = [
        0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4, 0xc5, 0x5a,
    ];

    #[test]
    fn test_known_answer_block() {
        let cipher = BlockCipher::new(&KEY);
        let mut frame = [0u8; FRAME_LEN];
        frame[..BLOCK_LEN].copy_from_slice(&PLAINTEXT);
        frame[16] = 0x02;
        frame[17] = 0x7f;

        cipher.seal(&mut frame);
        assert_eq!(&frame[..BLOCK_LEN], &CIPHERTEXT);
        assert_eq!(&frame[BLOCK_LEN..], &[0x02, 0x7f], "trailer stays in the clear");

        cipher.open(&mut frame);
        assert_eq!(&frame[..BLOCK_LEN], &PLAINTEXT);
    }
}
