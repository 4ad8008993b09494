// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image construction and inspection.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use citadel_boot::image::{ImageHeader, FLAG_ENCRYPTED, IMAGE_HEADER_SIZE, IMAGE_MAGIC};

/// Generate a signing key seed and report the verifying key.
pub fn genkey(out: &Path) -> Result<()> {
    let mut seed = [0u8; 32];
    getrandom::getrandom(&mut seed).context("gathering key material")?;
    fs::write(out, seed).with_context(|| format!("writing {}", out.display()))?;

    let verifying = SigningKey::from_bytes(&seed).verifying_key();
    println!("signing key seed: {}", out.display());
    println!("verifying key:    {}", hex(&verifying.to_bytes()));
    Ok(())
}

/// Build `output` = header + payload from the raw firmware in `input`.
pub fn create(
    input: &Path,
    output: &Path,
    key: &Path,
    version: u32,
    encrypt: Option<&Path>,
) -> Result<()> {
    let payload = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    if payload.is_empty() {
        bail!("{}: empty firmware payload", input.display());
    }
    let signing = load_key(key)?;

    let mut nonce = [0u8; 12];
    let mut stored = payload.clone();
    if let Some(key_path) = encrypt {
        let payload_key = load_raw_key(key_path)?;
        getrandom::getrandom(&mut nonce).context("gathering nonce")?;
        let mut cipher = ChaCha20::new(&payload_key.into(), &nonce.into());
        cipher.apply_keystream(&mut stored);
    }

    let mut header = ImageHeader {
        magic: IMAGE_MAGIC,
        version,
        size: payload.len() as u32,
        flags: if encrypt.is_some() { FLAG_ENCRYPTED } else { 0 },
        nonce,
        fw_tag: Sha256::digest(&payload).into(),
        sig: [0; 64],
        header_crc: 0,
    };
    header.sig = signing.sign(&header.signed_view()).to_bytes();

    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&stored);
    fs::write(output, &image).with_context(|| format!("writing {}", output.display()))?;

    println!(
        "{}: version {}, {} payload bytes{}",
        output.display(),
        version,
        payload.len(),
        if encrypt.is_some() { ", encrypted" } else { "" }
    );
    Ok(())
}

/// Print the header of `image` and run the offline checks.
pub fn inspect(image: &Path, key: Option<&Path>) -> Result<()> {
    let raw = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    if raw.len() < IMAGE_HEADER_SIZE {
        bail!("{}: shorter than an image header", image.display());
    }
    let header_bytes: [u8; IMAGE_HEADER_SIZE] = raw[..IMAGE_HEADER_SIZE].try_into().unwrap();
    let header = ImageHeader::from_bytes(&header_bytes);

    println!("magic:      0x{:08x}", header.magic);
    println!("version:    {}", header.version);
    println!("size:       {}", header.size);
    println!("flags:      0x{:08x}", header.flags);
    println!("fw tag:     {}", hex(&header.fw_tag));
    println!("header crc: 0x{:08x}", header.header_crc);

    if header.magic != IMAGE_MAGIC {
        bail!("bad magic");
    }
    if !header.crc_valid() {
        bail!("header CRC mismatch");
    }
    if raw.len() - IMAGE_HEADER_SIZE != header.size as usize {
        bail!(
            "payload is {} bytes but header declares {}",
            raw.len() - IMAGE_HEADER_SIZE,
            header.size
        );
    }

    if !header.is_encrypted() {
        let tag: [u8; 32] = Sha256::digest(&raw[IMAGE_HEADER_SIZE..]).into();
        if tag != header.fw_tag {
            bail!("payload tag mismatch");
        }
        println!("payload tag: OK");
    }

    if let Some(key_path) = key {
        let verifying = load_key(key_path)?.verifying_key();
        use ed25519_dalek::Verifier;
        let sig = ed25519_dalek::Signature::from_bytes(&header.sig);
        verifying
            .verify(&header.signed_view(), &sig)
            .context("signature check failed")?;
        println!("signature:  OK");
    }
    Ok(())
}

fn load_key(path: &Path) -> Result<SigningKey> {
    Ok(SigningKey::from_bytes(&load_raw_key(path)?))
}

fn load_raw_key(path: &Path) -> Result<[u8; 32]> {
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let key: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{}: expected exactly 32 key bytes", path.display()))?;
    Ok(key)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use citadel_boot::flash::FlashGate;
    use citadel_boot::image;
    use citadel_boot::layout::{FlashLayout, Region};
    use citadel_boot::{MemFlash, SoftCrypto};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("citadel-imgtool-test-{}-{}", std::process::id(), name));
        dir
    }

    fn test_layout() -> FlashLayout {
        let layout = FlashLayout {
            nv_counters: Region::new(0x0800_0000, 512),
            boot_info: Region::new(0x0800_0200, 1024),
            active_slot: Region::new(0x0800_0600, 4096),
            swap: Region::new(0x0800_1600, 1024),
            download_slot: Region::new(0x0800_1A00, 4096),
            page_size: 512,
            write_align: 8,
        };
        assert!(layout.validate());
        layout
    }

    #[test]
    fn test_create_then_core_verification_accepts_image() {
        let key_file = scratch("key");
        let fw_file = scratch("fw");
        let img_file = scratch("img");

        fs::write(&key_file, [7u8; 32]).unwrap();
        let firmware: Vec<u8> = (0..1000u32).map(|i| (i % 255) as u8).collect();
        fs::write(&fw_file, &firmware).unwrap();

        create(&fw_file, &img_file, &key_file, 2, None).unwrap();
        inspect(&img_file, Some(&key_file)).unwrap();

        // the produced image passes the boot core's candidate verification
        let image_bytes = fs::read(&img_file).unwrap();
        let layout = test_layout();
        let mut mem = MemFlash::covering(&layout);
        mem.patch(layout.download_slot.start, &image_bytes);
        let gate = FlashGate::new(mem, layout);

        let verifying = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        let mut crypto = SoftCrypto::new(verifying.to_bytes());
        let header = image::verify_candidate(&gate, &mut crypto, 1).expect("accepted");
        assert_eq!(header.version, 2);
        assert_eq!(header.size, firmware.len() as u32);

        for f in [key_file, fw_file, img_file] {
            let _ = fs::remove_file(f);
        }
    }

    #[test]
    fn test_encrypted_create_round_trips() {
        let key_file = scratch("ekey");
        let payload_key_file = scratch("pkey");
        let fw_file = scratch("efw");
        let img_file = scratch("eimg");

        fs::write(&key_file, [9u8; 32]).unwrap();
        fs::write(&payload_key_file, [5u8; 32]).unwrap();
        let firmware = vec![0xA5u8; 640];
        fs::write(&fw_file, &firmware).unwrap();

        create(&fw_file, &img_file, &key_file, 3, Some(&payload_key_file)).unwrap();

        let image_bytes = fs::read(&img_file).unwrap();
        // stored payload differs from the plaintext
        assert_ne!(&image_bytes[IMAGE_HEADER_SIZE..], firmware.as_slice());

        let layout = test_layout();
        let mut mem = MemFlash::covering(&layout);
        mem.patch(layout.download_slot.start, &image_bytes);
        let gate = FlashGate::new(mem, layout);

        let verifying = SigningKey::from_bytes(&[9u8; 32]).verifying_key();
        let mut crypto = SoftCrypto::new(verifying.to_bytes()).with_decryption_key([5u8; 32]);
        let header = image::verify_candidate(&gate, &mut crypto, 1).expect("accepted");
        assert!(header.is_encrypted());

        for f in [key_file, payload_key_file, fw_file, img_file] {
            let _ = fs::remove_file(f);
        }
    }

    #[test]
    fn test_inspect_rejects_tampered_payload() {
        let key_file = scratch("tkey");
        let fw_file = scratch("tfw");
        let img_file = scratch("timg");

        fs::write(&key_file, [1u8; 32]).unwrap();
        fs::write(&fw_file, vec![0x11u8; 256]).unwrap();
        create(&fw_file, &img_file, &key_file, 1, None).unwrap();

        let mut image_bytes = fs::read(&img_file).unwrap();
        image_bytes[IMAGE_HEADER_SIZE + 17] ^= 0x01;
        fs::write(&img_file, &image_bytes).unwrap();

        assert!(inspect(&img_file, Some(&key_file)).is_err());

        for f in [key_file, fw_file, img_file] {
            let _ = fs::remove_file(f);
        }
    }
}
