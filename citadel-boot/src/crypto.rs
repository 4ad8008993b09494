// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Cryptographic service consumed by verification and installation.
//!
//! The core treats signature verification, payload digesting and payload
//! decryption as a trusted black box behind [`CryptoService`]. The provided
//! [`SoftCrypto`] implementation is plain software: Ed25519 signatures,
//! SHA-256 payload tags and a ChaCha20 keystream for encrypted payloads.
//! The keystream is seekable, which is what lets an interrupted
//! installation resume decrypting mid-payload.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use crc::{Crc, CRC_16_UMTS};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_UMTS);

/// CRC-16 (poly 0x8005) used by the persistent record formats.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Trusted cryptographic primitives.
///
/// Streaming digest state and decryption state live in the implementation,
/// so the single-threaded caller drives one operation at a time.
pub trait CryptoService {
    /// Check a detached 64-byte signature over `message`.
    fn verify_signature(&self, message: &[u8], signature: &[u8; 64]) -> bool;

    /// Start digesting a payload.
    fn digest_begin(&mut self);
    fn digest_update(&mut self, data: &[u8]);
    /// Finish and return the 32-byte payload tag.
    fn digest_final(&mut self) -> [u8; 32];

    /// Position a payload decryption at `offset` bytes into the plaintext.
    /// Returns false when decryption is unavailable (no key provisioned).
    fn decrypt_begin(&mut self, nonce: &[u8; 12], offset: u32) -> bool;
    /// Decrypt the next chunk in place. Returns false without an active
    /// decryption context.
    fn decrypt(&mut self, buf: &mut [u8]) -> bool;

    /// CRC-16 over `data` (persistent record checksums).
    fn crc16(&self, data: &[u8]) -> u16 {
        crc16(data)
    }
}

/// Software implementation over the ed25519 / sha2 / chacha20 stacks.
pub struct SoftCrypto {
    verifying_key: [u8; 32],
    decryption_key: Option<[u8; 32]>,
    digest: Option<Sha256>,
    cipher: Option<ChaCha20>,
}

impl SoftCrypto {
    pub fn new(verifying_key: [u8; 32]) -> Self {
        Self {
            verifying_key,
            decryption_key: None,
            digest: None,
            cipher: None,
        }
    }

    /// Provision the payload decryption key.
    pub fn with_decryption_key(mut self, key: [u8; 32]) -> Self {
        self.decryption_key = Some(key);
        self
    }
}

impl CryptoService for SoftCrypto {
    fn verify_signature(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.verifying_key) else {
            return false;
        };
        let sig = Signature::from_bytes(signature);
        key.verify_strict(message, &sig).is_ok()
    }

    fn digest_begin(&mut self) {
        self.digest = Some(Sha256::new());
    }

    fn digest_update(&mut self, data: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(data);
        }
    }

    fn digest_final(&mut self) -> [u8; 32] {
        match self.digest.take() {
            Some(digest) => digest.finalize().into(),
            None => [0u8; 32],
        }
    }

    fn decrypt_begin(&mut self, nonce: &[u8; 12], offset: u32) -> bool {
        let Some(key) = self.decryption_key.as_ref() else {
            self.cipher = None;
            return false;
        };
        let mut cipher = ChaCha20::new(key.into(), nonce.into());
        cipher.seek(u64::from(offset));
        self.cipher = Some(cipher);
        true
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> bool {
        match self.cipher.as_mut() {
            Some(cipher) => {
                cipher.apply_keystream(buf);
                true
            }
            None => false,
        }
    }
}
