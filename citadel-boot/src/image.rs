// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware image metadata and verification.
//!
//! Every slot-resident image starts with a fixed 128-byte header. The
//! header binds the payload through a signed SHA-256 tag: the Ed25519
//! signature covers the identity of the image (magic, version, size, tag),
//! while the transport fields (encryption flag, nonce) sit outside the
//! signature but inside the header CRC — flipping them can only make
//! verification fail, never pass.
//!
//! Verification never mutates flash; encrypted candidates are decrypted on
//! the fly into a scratch chunk while digesting.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::crypto::CryptoService;
use crate::error::Exception;
use crate::flash::{FlashDriver, FlashGate};
use crate::layout::Region;

pub const IMAGE_MAGIC: u32 = 0x4C44_5443; // "CTDL"
pub const IMAGE_HEADER_SIZE: usize = 128;

/// Payload is stored encrypted and must be decrypted during installation.
pub const FLAG_ENCRYPTED: u32 = 1 << 0;

const SIGNED_VIEW_LEN: usize = 44;
const VERIFY_CHUNK: usize = 1024;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Fixed metadata prepended to a firmware payload. Immutable once written;
/// the installer rewrites only the transport fields when it stores a
/// decrypted payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub magic: u32,
    /// Anti-rollback version of the image.
    pub version: u32,
    /// Payload length in bytes (header excluded).
    pub size: u32,
    pub flags: u32,
    /// Stream-cipher nonce for encrypted payloads.
    pub nonce: [u8; 12],
    /// SHA-256 of the plaintext payload.
    pub fw_tag: [u8; 32],
    /// Ed25519 signature over the signed view (magic, version, size, tag).
    pub sig: [u8; 64],
    pub header_crc: u32,
}

impl ImageHeader {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// The byte view covered by the signature.
    pub fn signed_view(&self) -> [u8; SIGNED_VIEW_LEN] {
        let mut out = [0u8; SIGNED_VIEW_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..44].copy_from_slice(&self.fw_tag);
        out
    }

    /// Serialize with a freshly computed header CRC.
    pub fn to_bytes(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut out = [0u8; IMAGE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..28].copy_from_slice(&self.nonce);
        out[28..60].copy_from_slice(&self.fw_tag);
        out[60..124].copy_from_slice(&self.sig);
        let crc = CRC32.checksum(&out[..124]);
        out[124..128].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse a stored header. Field validation is the verifier's job.
    pub fn from_bytes(raw: &[u8; IMAGE_HEADER_SIZE]) -> Self {
        let word = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&raw[16..28]);
        let mut fw_tag = [0u8; 32];
        fw_tag.copy_from_slice(&raw[28..60]);
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&raw[60..124]);
        Self {
            magic: word(0),
            version: word(4),
            size: word(8),
            flags: word(12),
            nonce,
            fw_tag,
            sig,
            header_crc: word(124),
        }
    }

    /// Whether the stored CRC matches the header content.
    pub fn crc_valid(&self) -> bool {
        let bytes = self.to_bytes();
        u32::from_le_bytes([bytes[124], bytes[125], bytes[126], bytes[127]]) == self.header_crc
    }

    /// Read the header at the start of `slot`.
    pub fn read_from<D: FlashDriver>(
        gate: &FlashGate<D>,
        slot: &Region,
    ) -> Result<Self, crate::flash::FlashError> {
        let mut raw = [0u8; IMAGE_HEADER_SIZE];
        gate.read(slot.start, &mut raw)?;
        Ok(Self::from_bytes(&raw))
    }
}

/// Cheap check whether the download slot holds something that looks like a
/// candidate image. No trust decision is made here.
pub fn candidate_present<D: FlashDriver>(gate: &FlashGate<D>) -> bool {
    let slot = gate.layout().download_slot;
    let mut raw = [0u8; 4];
    match gate.read(slot.start, &mut raw) {
        Ok(()) => u32::from_le_bytes(raw) == IMAGE_MAGIC,
        Err(_) => false,
    }
}

/// Verify the candidate image in the download slot against the trusted
/// anti-rollback version. Candidates must be strictly newer.
pub fn verify_candidate<D: FlashDriver, C: CryptoService>(
    gate: &FlashGate<D>,
    crypto: &mut C,
    trusted_version: u32,
) -> Result<ImageHeader, Exception> {
    let slot = gate.layout().download_slot;
    verify_slot(gate, crypto, &slot, trusted_version, true)
}

/// Re-verify the image in the active slot, as done on every boot. The
/// active image may equal the trusted version (it normally does).
pub fn verify_active<D: FlashDriver, C: CryptoService>(
    gate: &FlashGate<D>,
    crypto: &mut C,
    trusted_version: u32,
) -> Result<ImageHeader, Exception> {
    let slot = gate.layout().active_slot;
    verify_slot(gate, crypto, &slot, trusted_version, false)
}

fn verify_slot<D: FlashDriver, C: CryptoService>(
    gate: &FlashGate<D>,
    crypto: &mut C,
    slot: &Region,
    trusted_version: u32,
    strictly_newer: bool,
) -> Result<ImageHeader, Exception> {
    let header = ImageHeader::read_from(gate, slot).map_err(|_| Exception::FlashError)?;

    // 1. magic
    if header.magic != IMAGE_MAGIC {
        return Err(Exception::IncorrectBinary);
    }
    if !header.crc_valid() {
        return Err(Exception::IncorrectBinary);
    }

    // 2. declared size against the slot capacity
    if header.size == 0 {
        return Err(Exception::InconsistentFwSize);
    }
    if header.size > gate.layout().slot_payload_capacity() {
        return Err(Exception::FwTooBig);
    }

    // 3. anti-rollback version
    let version_ok = if strictly_newer {
        header.version > trusted_version
    } else {
        header.version >= trusted_version
    };
    if !version_ok {
        return Err(Exception::IncorrectVersion);
    }

    // 4. header authenticity, then the payload tag
    if !crypto.verify_signature(&header.signed_view(), &header.sig) {
        return Err(Exception::HeaderAuthFailed);
    }
    let tag = payload_digest(gate, crypto, slot, &header)?;
    if tag != header.fw_tag {
        return Err(Exception::SignatureFailure);
    }
    Ok(header)
}

/// SHA-256 of the plaintext payload in `slot`, decrypting on the fly when
/// the header marks the payload as encrypted. Flash is only read.
fn payload_digest<D: FlashDriver, C: CryptoService>(
    gate: &FlashGate<D>,
    crypto: &mut C,
    slot: &Region,
    header: &ImageHeader,
) -> Result<[u8; 32], Exception> {
    if header.is_encrypted() && !crypto.decrypt_begin(&header.nonce, 0) {
        return Err(Exception::DecryptFailure);
    }
    crypto.digest_begin();

    let mut chunk = [0u8; VERIFY_CHUNK];
    let mut offset = 0u32;
    while offset < header.size {
        let n = VERIFY_CHUNK.min((header.size - offset) as usize);
        gate.read(
            slot.start + IMAGE_HEADER_SIZE as u32 + offset,
            &mut chunk[..n],
        )
        .map_err(|_| Exception::FlashError)?;
        if header.is_encrypted() && !crypto.decrypt(&mut chunk[..n]) {
            return Err(Exception::DecryptFailure);
        }
        crypto.digest_update(&chunk[..n]);
        offset += n as u32;
    }
    Ok(crypto.digest_final())
}
