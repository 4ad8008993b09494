// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared fixtures: a compact flash layout, deterministic signing keys and
//! image construction mirroring the host image tool.

#![allow(dead_code)]

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use citadel_boot::flash::FlashGate;
use citadel_boot::image::{ImageHeader, FLAG_ENCRYPTED, IMAGE_HEADER_SIZE, IMAGE_MAGIC};
use citadel_boot::layout::{FlashLayout, Region};
use citadel_boot::{MemFlash, SoftCrypto};

pub const PAGE: u32 = 512;
pub const SLOT_LEN: u32 = 4096;
pub const SWAP_LEN: u32 = 1024;

pub const SIGNING_SEED: [u8; 32] = [0x42; 32];
pub const PAYLOAD_KEY: [u8; 32] = [0x33; 32];

/// Small map used by most tests: 4 KB slots, 1 KB swap (4 stripes).
pub fn small_layout() -> FlashLayout {
    let layout = FlashLayout {
        nv_counters: Region::new(0x0800_0000, PAGE),
        boot_info: Region::new(0x0800_0200, 2 * PAGE),
        active_slot: Region::new(0x0800_0600, SLOT_LEN),
        swap: Region::new(0x0800_1600, SWAP_LEN),
        download_slot: Region::new(0x0800_1A00, SLOT_LEN),
        page_size: PAGE,
        write_align: 8,
    };
    assert!(layout.validate());
    layout
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&SIGNING_SEED)
}

pub fn verifying_key() -> [u8; 32] {
    signing_key().verifying_key().to_bytes()
}

pub fn soft_crypto() -> SoftCrypto {
    SoftCrypto::new(verifying_key()).with_decryption_key(PAYLOAD_KEY)
}

/// A recognizable payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 13) as u8).collect()
}

/// Build a signed image (header + payload bytes) the way the image tool
/// does. `encrypt` stores the payload under the test payload key.
pub fn build_image(payload: &[u8], version: u32, encrypt: bool) -> Vec<u8> {
    let fw_tag: [u8; 32] = Sha256::digest(payload).into();
    let nonce = [0x5A; 12];

    let mut header = ImageHeader {
        magic: IMAGE_MAGIC,
        version,
        size: payload.len() as u32,
        flags: if encrypt { FLAG_ENCRYPTED } else { 0 },
        nonce,
        fw_tag,
        sig: [0; 64],
        header_crc: 0,
    };
    header.sig = signing_key().sign(&header.signed_view()).to_bytes();

    let mut stored = payload.to_vec();
    if encrypt {
        let mut cipher = ChaCha20::new(&PAYLOAD_KEY.into(), &nonce.into());
        cipher.apply_keystream(&mut stored);
    }

    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&stored);
    image
}

/// Place image bytes at the start of `region`, bypassing NOR semantics.
pub fn place_image(mem: &mut MemFlash, region: &Region, image: &[u8]) {
    mem.patch(region.start, image);
}

/// Read back the payload stored in `region`.
pub fn slot_payload(gate: &FlashGate<MemFlash>, region: &Region, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    gate.read(region.start + IMAGE_HEADER_SIZE as u32, &mut out)
        .expect("payload read");
    out
}
