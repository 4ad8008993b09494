// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for image header parsing and the verification checks.

mod common;

use citadel_boot::flash::FlashGate;
use citadel_boot::image::{self, ImageHeader, IMAGE_HEADER_SIZE};
use citadel_boot::{Exception, MemFlash, SoftCrypto};
use common::{build_image, payload, place_image, small_layout, soft_crypto, verifying_key};

fn setup(image: &[u8]) -> FlashGate<MemFlash> {
    let layout = small_layout();
    let mut mem = MemFlash::covering(&layout);
    place_image(&mut mem, &layout.download_slot, image);
    FlashGate::new(mem, layout)
}

// =============================================================================
// Header record
// =============================================================================

#[test]
fn test_header_round_trips_through_bytes() {
    let image = build_image(&payload(256), 4, false);
    let raw: [u8; IMAGE_HEADER_SIZE] = image[..IMAGE_HEADER_SIZE].try_into().unwrap();
    let header = ImageHeader::from_bytes(&raw);
    assert_eq!(header.version, 4);
    assert_eq!(header.size, 256);
    assert!(header.crc_valid());
    assert_eq!(header.to_bytes(), raw);
}

#[test]
fn test_candidate_present_sees_magic() {
    let gate = setup(&build_image(&payload(64), 2, false));
    assert!(image::candidate_present(&gate));

    let layout = small_layout();
    let empty = FlashGate::new(MemFlash::covering(&layout), layout);
    assert!(!image::candidate_present(&empty));
}

// =============================================================================
// The four verification checks, in order
// =============================================================================

#[test]
fn test_valid_candidate_passes() {
    let gate = setup(&build_image(&payload(1000), 2, false));
    let header = image::verify_candidate(&gate, &mut soft_crypto(), 1).expect("valid image");
    assert_eq!(header.version, 2);
}

#[test]
fn test_bad_magic_is_incorrect_binary() {
    let mut image = build_image(&payload(64), 2, false);
    image[0] ^= 0xFF;
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::IncorrectBinary)
    );
}

#[test]
fn test_header_crc_mismatch_is_incorrect_binary() {
    let mut image = build_image(&payload(64), 2, false);
    image[125] ^= 0x01; // stored CRC
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::IncorrectBinary)
    );
}

#[test]
fn test_zero_size_is_inconsistent() {
    let good = build_image(&payload(64), 2, false);
    let mut header = ImageHeader::from_bytes(&good[..IMAGE_HEADER_SIZE].try_into().unwrap());
    header.size = 0;
    let mut image = header.to_bytes().to_vec(); // CRC refreshed, signature now stale
    image.extend_from_slice(&good[IMAGE_HEADER_SIZE..]);
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::InconsistentFwSize)
    );
}

#[test]
fn test_oversize_is_fw_too_big() {
    let layout = small_layout();
    let good = build_image(&payload(64), 2, false);
    let mut header = ImageHeader::from_bytes(&good[..IMAGE_HEADER_SIZE].try_into().unwrap());
    header.size = layout.slot_payload_capacity() + 1;
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&good[IMAGE_HEADER_SIZE..]);
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::FwTooBig)
    );
}

#[test]
fn test_version_at_or_below_trusted_is_incorrect_version() {
    let gate = setup(&build_image(&payload(64), 1, false));
    // candidate version 1 when the counter already reached 2
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 2),
        Err(Exception::IncorrectVersion)
    );
    // equal is rejected too: candidates must be strictly newer
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::IncorrectVersion)
    );
}

#[test]
fn test_wrong_key_is_header_auth_failure() {
    let gate = setup(&build_image(&payload(64), 2, false));
    let mut crypto = SoftCrypto::new([0x99; 32]);
    assert_eq!(
        image::verify_candidate(&gate, &mut crypto, 1),
        Err(Exception::HeaderAuthFailed)
    );
}

#[test]
fn test_tampered_signed_field_is_header_auth_failure() {
    let good = build_image(&payload(64), 2, false);
    let mut header = ImageHeader::from_bytes(&good[..IMAGE_HEADER_SIZE].try_into().unwrap());
    header.version = 9; // covered by the signature
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&good[IMAGE_HEADER_SIZE..]);
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::HeaderAuthFailed)
    );
}

#[test]
fn test_tampered_payload_byte_is_signature_failure() {
    let mut image = build_image(&payload(1000), 2, false);
    image[IMAGE_HEADER_SIZE + 517] ^= 0x01;
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::SignatureFailure)
    );
}

#[test]
fn test_tampered_fw_tag_is_header_auth_failure() {
    let good = build_image(&payload(64), 2, false);
    let mut header = ImageHeader::from_bytes(&good[..IMAGE_HEADER_SIZE].try_into().unwrap());
    header.fw_tag[0] ^= 0x01; // covered by the signature
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&good[IMAGE_HEADER_SIZE..]);
    let gate = setup(&image);
    assert_eq!(
        image::verify_candidate(&gate, &mut soft_crypto(), 1),
        Err(Exception::HeaderAuthFailed)
    );
}

#[test]
fn test_verification_never_mutates_flash() {
    let image = build_image(&payload(512), 2, false);
    let gate = setup(&image);
    let before = gate.driver().snapshot();
    let _ = image::verify_candidate(&gate, &mut soft_crypto(), 1);
    assert_eq!(before, gate.driver().snapshot());
}

// =============================================================================
// Encrypted candidates
// =============================================================================

#[test]
fn test_encrypted_candidate_passes_with_key() {
    let gate = setup(&build_image(&payload(777), 3, true));
    let header = image::verify_candidate(&gate, &mut soft_crypto(), 1).expect("decryptable");
    assert!(header.is_encrypted());
}

#[test]
fn test_encrypted_candidate_without_key_is_decrypt_failure() {
    let gate = setup(&build_image(&payload(777), 3, true));
    let mut crypto = SoftCrypto::new(verifying_key()); // no payload key
    assert_eq!(
        image::verify_candidate(&gate, &mut crypto, 1),
        Err(Exception::DecryptFailure)
    );
}

#[test]
fn test_encrypted_candidate_with_wrong_key_is_signature_failure() {
    let gate = setup(&build_image(&payload(777), 3, true));
    // wrong keystream: decryption "succeeds" but the plaintext tag differs
    let mut crypto = SoftCrypto::new(verifying_key()).with_decryption_key([0xEE; 32]);
    assert_eq!(
        image::verify_candidate(&gate, &mut crypto, 1),
        Err(Exception::SignatureFailure)
    );
}
