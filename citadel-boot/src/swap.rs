// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Crash-safe firmware installation: dual-slot swap through the scratch
//! region.
//!
//! The slot extent is tiled into stripes the size of the swap region. Each
//! stripe goes through three steps: save the active stripe into swap,
//! program the candidate stripe into the active slot (decrypting on the
//! fly when the candidate is encrypted), then park the saved stripe in the
//! download slot so the previous image survives as the recovery copy until
//! commit. Progress is persisted in [`BootInfo`] *after* each completed
//! step and *before* the next destructive one, so at every instant at most
//! one region holds the only copy of any stripe, and a reset at any step
//! boundary re-enters the interrupted step deterministically.
//!
//! [`next_step`] is the whole algorithm: progress in, effects plus next
//! progress out. [`run`] just loops it; tests interrupt it at arbitrary
//! points and re-run to convergence.

use crate::bootinfo::{self, BootInfo, InstallPhase};
use crate::crypto::CryptoService;
use crate::flash::{FlashDriver, FlashError, FlashGate};
use crate::image::{ImageHeader, FLAG_ENCRYPTED, IMAGE_HEADER_SIZE};
use crate::nvcounter::{CounterId, NvCounterStore, NvError};
use crate::platform::Platform;

const COPY_CHUNK: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstallError {
    Flash(FlashError),
    /// Keystream unavailable or rejected while decrypting the candidate.
    Decrypt,
    Counter(NvError),
}

impl From<FlashError> for InstallError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl From<NvError> for InstallError {
    fn from(e: NvError) -> Self {
        Self::Counter(e)
    }
}

impl InstallError {
    pub fn to_exception(self) -> crate::Exception {
        match self {
            Self::Flash(_) => crate::Exception::FlashError,
            Self::Decrypt => crate::Exception::DecryptFailure,
            Self::Counter(NvError::Full) => crate::Exception::NvCounterFull,
            Self::Counter(_) => crate::Exception::NvCounterError,
        }
    }
}

/// Begin installing the already-verified candidate: capture its metadata
/// and persist the initial progress marker. From here on the download slot
/// content is no longer re-trusted; a resumed install works from the
/// persisted record.
pub fn start<D: FlashDriver, P: Platform>(
    gate: &mut FlashGate<D>,
    plat: &mut P,
    info: &mut BootInfo,
    header: &ImageHeader,
) -> Result<(), InstallError> {
    info.candidate_version = header.version;
    info.candidate_size = header.size;
    info.candidate_flags = header.flags;
    info.install_stripe = 0;
    info.set_phase(InstallPhase::SaveActive);
    bootinfo::store(gate, plat, info)?;
    Ok(())
}

/// Drive the installation recorded in `info` to completion (including the
/// commit). No-op when nothing is in progress.
pub fn run<D: FlashDriver, P: Platform, C: CryptoService>(
    gate: &mut FlashGate<D>,
    plat: &mut P,
    crypto: &mut C,
    counters: &mut NvCounterStore,
    info: &mut BootInfo,
) -> Result<(), InstallError> {
    while info.phase() != InstallPhase::Idle {
        next_step(gate, plat, crypto, counters, info)?;
    }
    Ok(())
}

/// Execute exactly one persisted step and persist the follow-up progress.
///
/// Every step is idempotent given its persisted predecessor: the region a
/// step destroys is never the source of the same step, so re-entering an
/// interrupted step replays it safely.
pub fn next_step<D: FlashDriver, P: Platform, C: CryptoService>(
    gate: &mut FlashGate<D>,
    plat: &mut P,
    crypto: &mut C,
    counters: &mut NvCounterStore,
    info: &mut BootInfo,
) -> Result<(), InstallError> {
    let layout = *gate.layout();
    let stripe_len = layout.swap.len;
    let stripe_count = layout.active_slot.len / stripe_len;
    let stripe = info.install_stripe;
    let stripe_off = stripe * stripe_len;

    match info.phase() {
        InstallPhase::Idle => Ok(()),

        InstallPhase::SaveActive => {
            gate.erase(plat, layout.swap.start, stripe_len)?;
            copy(
                gate,
                layout.active_slot.start + stripe_off,
                layout.swap.start,
                stripe_len,
            )?;
            info.set_phase(InstallPhase::ProgramActive);
            bootinfo::store(gate, plat, info)?;
            Ok(())
        }

        InstallPhase::ProgramActive => {
            program_active_stripe(gate, plat, crypto, info, stripe_off, stripe_len)?;
            info.set_phase(InstallPhase::RestoreDownload);
            bootinfo::store(gate, plat, info)?;
            Ok(())
        }

        InstallPhase::RestoreDownload => {
            gate.erase(plat, layout.download_slot.start + stripe_off, stripe_len)?;
            copy(
                gate,
                layout.swap.start,
                layout.download_slot.start + stripe_off,
                stripe_len,
            )?;
            if stripe + 1 == stripe_count {
                info.set_phase(InstallPhase::Commit);
            } else {
                info.install_stripe = stripe + 1;
                info.set_phase(InstallPhase::SaveActive);
            }
            bootinfo::store(gate, plat, info)?;
            Ok(())
        }

        InstallPhase::Commit => {
            // Advance the rollback counter before clearing the progress
            // record; both writes are idempotent, so a reset in between
            // simply re-enters the commit.
            counters.write(gate, CounterId::FW_VERSION, info.candidate_version)?;
            info.active_version = info.candidate_version;
            info.install_stripe = 0;
            info.set_phase(InstallPhase::Idle);
            bootinfo::store(gate, plat, info)?;
            #[cfg(feature = "defmt")]
            defmt::println!("install: committed version {}", info.active_version);
            Ok(())
        }
    }
}

/// Program one stripe of the candidate into the active slot. Stripe 0
/// rewrites the installed header (encryption flag cleared, CRC refreshed)
/// through the privileged gate path; the payload range is decrypted in
/// transit when the candidate was stored encrypted.
fn program_active_stripe<D: FlashDriver, P: Platform, C: CryptoService>(
    gate: &mut FlashGate<D>,
    plat: &mut P,
    crypto: &mut C,
    info: &mut BootInfo,
    stripe_off: u32,
    stripe_len: u32,
) -> Result<(), InstallError> {
    let layout = *gate.layout();
    let header_len = IMAGE_HEADER_SIZE as u32;
    let encrypted = info.candidate_flags & FLAG_ENCRYPTED != 0;
    let payload_len = info.candidate_size;

    gate.erase_privileged(plat, layout.active_slot.start + stripe_off, stripe_len)?;

    // Plaintext offset of the first payload byte this stripe carries.
    let payload_start = stripe_off.saturating_sub(header_len);
    if encrypted && payload_start < payload_len {
        // The nonce lives in the candidate header for stripe 0 (still
        // intact in the download slot) and in the already-installed active
        // header afterwards.
        let nonce_slot = if stripe_off == 0 {
            layout.download_slot
        } else {
            layout.active_slot
        };
        let nonce = ImageHeader::read_from(gate, &nonce_slot)?.nonce;
        if !crypto.decrypt_begin(&nonce, payload_start) {
            return Err(InstallError::Decrypt);
        }
    }

    if stripe_off == 0 {
        let candidate = ImageHeader::read_from(gate, &layout.download_slot)?;
        let mut installed = candidate;
        installed.flags = candidate.flags & !FLAG_ENCRYPTED;
        gate.write_privileged(layout.active_slot.start, &installed.to_bytes())?;
        copy_decrypting(
            gate,
            crypto,
            layout.download_slot.start + header_len,
            layout.active_slot.start + header_len,
            stripe_len - header_len,
            0,
            payload_len,
            encrypted,
        )
    } else {
        copy_decrypting(
            gate,
            crypto,
            layout.download_slot.start + stripe_off,
            layout.active_slot.start + stripe_off,
            stripe_len,
            payload_start,
            payload_len,
            encrypted,
        )
    }
}

/// Chunked copy between regions; zero length is a no-op success.
fn copy<D: FlashDriver>(
    gate: &mut FlashGate<D>,
    src: u32,
    dst: u32,
    len: u32,
) -> Result<(), FlashError> {
    let mut chunk = [0u8; COPY_CHUNK];
    let mut off = 0u32;
    while off < len {
        let n = COPY_CHUNK.min((len - off) as usize);
        gate.read(src + off, &mut chunk[..n])?;
        gate.write(dst + off, &chunk[..n])?;
        off += n as u32;
    }
    Ok(())
}

/// Chunked copy decrypting the payload byte range in transit. Bytes beyond
/// the payload (slot tail) move verbatim.
#[allow(clippy::too_many_arguments)]
fn copy_decrypting<D: FlashDriver, C: CryptoService>(
    gate: &mut FlashGate<D>,
    crypto: &mut C,
    src: u32,
    dst: u32,
    len: u32,
    first_payload_off: u32,
    payload_len: u32,
    encrypted: bool,
) -> Result<(), InstallError> {
    let mut chunk = [0u8; COPY_CHUNK];
    let mut off = 0u32;
    while off < len {
        let n = COPY_CHUNK.min((len - off) as usize);
        gate.read(src + off, &mut chunk[..n])?;
        if encrypted {
            let p0 = first_payload_off + off;
            if p0 < payload_len {
                let m = (n as u32).min(payload_len - p0) as usize;
                if !crypto.decrypt(&mut chunk[..m]) {
                    return Err(InstallError::Decrypt);
                }
            }
        }
        gate.write_privileged(dst + off, &chunk[..n])?;
        off += n as u32;
    }
    Ok(())
}
