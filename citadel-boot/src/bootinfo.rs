// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Persistent boot-status record.
//!
//! Read at every boot, updated on errors and state transitions. The record
//! must stay internally consistent even if a write is interrupted, so it is
//! stored ping-pong across the two pages of the boot-info area: writes
//! alternate pages with an incrementing sequence number, and loading picks
//! the CRC-valid copy with the highest sequence. Erasing one page never
//! touches the other copy.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::flash::{FlashDriver, FlashError, FlashGate};
use crate::platform::Platform;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const BOOT_INFO_MAGIC: u32 = 0xB117_DA7A;
pub const BOOT_INFO_LEN: usize = 48;

/// Step the installer performs next; persisted so a reset at any step
/// boundary resumes deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstallPhase {
    /// No installation in progress.
    Idle,
    /// Copy the active-slot stripe into the swap region.
    SaveActive,
    /// Program the candidate stripe into the active slot.
    ProgramActive,
    /// Copy the saved stripe from swap into the download slot.
    RestoreDownload,
    /// Swap complete; advance the rollback counter and mark active.
    Commit,
}

impl InstallPhase {
    pub fn encode(self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::SaveActive => 1,
            Self::ProgramActive => 2,
            Self::RestoreDownload => 3,
            Self::Commit => 4,
        }
    }

    pub fn decode(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Idle,
            1 => Self::SaveActive,
            2 => Self::ProgramActive,
            3 => Self::RestoreDownload,
            4 => Self::Commit,
            _ => return None,
        })
    }
}

/// Persistent boot record (48 bytes on flash, CRC-32 trailer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootInfo {
    /// Ping-pong sequence; highest valid copy wins.
    pub seq: u32,
    /// Encoded [`crate::Exception`] of the last execution, 0 if none.
    pub last_error: u32,
    /// Boots that reached the failure handler since the last confirmed run.
    pub consecutive_failures: u32,
    /// Version of the image committed to the active slot.
    pub active_version: u32,
    /// Installer progress (see [`InstallPhase`]).
    pub install_phase: u32,
    pub install_stripe: u32,
    /// Candidate metadata captured when an installation starts, so a resumed
    /// install does not re-trust the download slot content.
    pub candidate_version: u32,
    pub candidate_size: u32,
    pub candidate_flags: u32,
}

impl BootInfo {
    /// Record for a device with no history.
    pub fn fresh() -> Self {
        Self {
            seq: 0,
            last_error: 0,
            consecutive_failures: 0,
            active_version: 0,
            install_phase: InstallPhase::Idle.encode(),
            install_stripe: 0,
            candidate_version: 0,
            candidate_size: 0,
            candidate_flags: 0,
        }
    }

    pub fn phase(&self) -> InstallPhase {
        // A record that decoded (magic + CRC) but carries an unknown phase
        // code is treated as mid-install corruption handled by the caller.
        InstallPhase::decode(self.install_phase).unwrap_or(InstallPhase::Idle)
    }

    pub fn set_phase(&mut self, phase: InstallPhase) {
        self.install_phase = phase.encode();
    }

    pub fn to_bytes(&self) -> [u8; BOOT_INFO_LEN] {
        let mut out = [0u8; BOOT_INFO_LEN];
        let words = [
            BOOT_INFO_MAGIC,
            self.seq,
            self.last_error,
            self.consecutive_failures,
            self.active_version,
            self.install_phase,
            self.install_stripe,
            self.candidate_version,
            self.candidate_size,
            self.candidate_flags,
            0, // reserved
        ];
        for (i, w) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        let crc = CRC32.checksum(&out[..BOOT_INFO_LEN - 4]);
        out[BOOT_INFO_LEN - 4..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse one stored copy; `None` if magic or CRC does not hold.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < BOOT_INFO_LEN {
            return None;
        }
        let word = |i: usize| {
            u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]])
        };
        if word(0) != BOOT_INFO_MAGIC {
            return None;
        }
        let crc = CRC32.checksum(&raw[..BOOT_INFO_LEN - 4]);
        if crc != word(BOOT_INFO_LEN / 4 - 1) {
            return None;
        }
        Some(Self {
            seq: word(1),
            last_error: word(2),
            consecutive_failures: word(3),
            active_version: word(4),
            install_phase: word(5),
            install_stripe: word(6),
            candidate_version: word(7),
            candidate_size: word(8),
            candidate_flags: word(9),
        })
    }
}

/// Load the freshest valid copy, or `None` when both pages are invalid
/// (virgin device or double corruption).
pub fn load<D: FlashDriver>(gate: &FlashGate<D>) -> Result<Option<BootInfo>, FlashError> {
    let area = gate.layout().boot_info;
    let page = gate.layout().page_size;
    let mut best: Option<BootInfo> = None;
    for copy in 0..2u32 {
        let mut raw = [0u8; BOOT_INFO_LEN];
        gate.read(area.start + copy * page, &mut raw)?;
        if let Some(info) = BootInfo::from_bytes(&raw) {
            // On a seq tie, the first copy wins; ties only happen after
            // external tampering since stores always increment.
            if best.map_or(true, |b| info.seq > b.seq) {
                best = Some(info);
            }
        }
    }
    Ok(best)
}

/// Persist `info` into the next ping-pong page, bumping its sequence.
///
/// The page holding the previous copy stays untouched, so power loss during
/// this call leaves at least one valid record.
pub fn store<D: FlashDriver, P: Platform>(
    gate: &mut FlashGate<D>,
    plat: &mut P,
    info: &mut BootInfo,
) -> Result<(), FlashError> {
    let area = gate.layout().boot_info;
    let page = gate.layout().page_size;
    // The sequence advances only once the record landed: a failed store
    // keeps targeting the stale page on retry, so the page holding the
    // last good record is never erased by a store that may not finish.
    let mut pending = *info;
    pending.seq = info.seq.wrapping_add(1);
    let target = area.start + (pending.seq % 2) * page;
    gate.erase(plat, target, page)?;
    gate.write(target, &pending.to_bytes())?;
    *info = pending;
    Ok(())
}
