// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash region map: slots, swap scratch, boot-info and counter areas.
//!
//! Addresses and sizes are build-time constants aligned to the erase
//! granularity of the target device. The map is the on-flash contract that
//! must round-trip across resets; everything else in the crate addresses
//! flash through a [`Region`] of this layout.

use crate::image::IMAGE_HEADER_SIZE;

// --- Default map (internal flash, 2 KB pages) ---

pub const FLASH_PAGE_SIZE: u32 = 2048;
pub const FLASH_WRITE_ALIGN: u32 = 8;

pub const NV_COUNTER_AREA_ADDR: u32 = 0x0800_D000;
pub const NV_COUNTER_AREA_SIZE: u32 = 0x800;
pub const BOOT_INFO_ADDR: u32 = 0x0800_E000;
pub const BOOT_INFO_SIZE: u32 = 2 * FLASH_PAGE_SIZE;

// Slot regions must stay aligned on the erase granularity.
pub const SLOT_ACTIVE_ADDR: u32 = 0x0801_0000;
pub const SLOT_SIZE: u32 = 216 * 1024;
pub const SWAP_ADDR: u32 = 0x0804_6000;
pub const SWAP_SIZE: u32 = 8 * 1024;
pub const SLOT_DOWNLOAD_ADDR: u32 = 0x0804_8000;

/// A fixed, contiguous address range in flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub len: u32,
}

impl Region {
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// First address past the region.
    pub const fn end(&self) -> u32 {
        self.start + self.len
    }

    /// Whether `[addr, addr + len)` falls entirely inside this region.
    /// Zero-length accesses are contained if the start address is.
    pub const fn contains(&self, addr: u32, len: u32) -> bool {
        addr >= self.start && len <= self.len && addr - self.start <= self.len - len
    }

    pub const fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Build-time flash map consumed by the whole core.
///
/// Exactly two firmware slots plus one swap scratch region; the slots never
/// overlap and share a size, so either can hold any accepted image.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    /// Slot holding the image selected for execution.
    pub active_slot: Region,
    /// Slot receiving downloaded candidate images.
    pub download_slot: Region,
    /// Scratch region used as transit buffer during installation.
    pub swap: Region,
    /// Two-page area holding the redundant boot-status record.
    pub boot_info: Region,
    /// Append-only monotonic counter log area.
    pub nv_counters: Region,
    pub page_size: u32,
    pub write_align: u32,
}

pub const DEFAULT_LAYOUT: FlashLayout = FlashLayout {
    active_slot: Region::new(SLOT_ACTIVE_ADDR, SLOT_SIZE),
    download_slot: Region::new(SLOT_DOWNLOAD_ADDR, SLOT_SIZE),
    swap: Region::new(SWAP_ADDR, SWAP_SIZE),
    boot_info: Region::new(BOOT_INFO_ADDR, BOOT_INFO_SIZE),
    nv_counters: Region::new(NV_COUNTER_AREA_ADDR, NV_COUNTER_AREA_SIZE),
    page_size: FLASH_PAGE_SIZE,
    write_align: FLASH_WRITE_ALIGN,
};

const _: () = assert!(DEFAULT_LAYOUT.validate());

impl FlashLayout {
    /// The protected header sub-region at the start of the active slot.
    ///
    /// Ordinary slot writes are rejected here; only the privileged install
    /// path may rewrite the installed image header.
    pub const fn protected_header(&self) -> Region {
        Region::new(self.active_slot.start, IMAGE_HEADER_SIZE as u32)
    }

    /// Capacity left for an image payload once the header is accounted for.
    pub const fn slot_payload_capacity(&self) -> u32 {
        self.active_slot.len - IMAGE_HEADER_SIZE as u32
    }

    /// Check the structural invariants of the map.
    ///
    /// Usable in a `const` assertion so a bad map fails the build, and
    /// re-checked at gate construction for layouts built at runtime (tests).
    pub const fn validate(&self) -> bool {
        self.page_size.is_power_of_two()
            && self.write_align.is_power_of_two()
            && self.write_align <= self.page_size
            // erase granularity
            && self.active_slot.start % self.page_size == 0
            && self.active_slot.len % self.page_size == 0
            && self.download_slot.start % self.page_size == 0
            && self.swap.start % self.page_size == 0
            && self.swap.len % self.page_size == 0
            && self.boot_info.start % self.page_size == 0
            && self.nv_counters.start % self.page_size == 0
            // equal-sized slots, non-empty swap that tiles the slots
            && self.active_slot.len == self.download_slot.len
            && self.active_slot.len > IMAGE_HEADER_SIZE as u32
            && self.swap.len > 0
            && self.active_slot.len % self.swap.len == 0
            // boot info needs one page per redundant copy
            && self.boot_info.len == 2 * self.page_size
            // counter log: header element + at least one append slot
            && self.nv_counters.len >= 2 * 8
            && self.nv_counters.len % 8 == 0
            // disjoint regions
            && !self.active_slot.overlaps(&self.download_slot)
            && !self.active_slot.overlaps(&self.swap)
            && !self.active_slot.overlaps(&self.boot_info)
            && !self.active_slot.overlaps(&self.nv_counters)
            && !self.download_slot.overlaps(&self.swap)
            && !self.download_slot.overlaps(&self.boot_info)
            && !self.download_slot.overlaps(&self.nv_counters)
            && !self.swap.overlaps(&self.boot_info)
            && !self.swap.overlaps(&self.nv_counters)
            && !self.boot_info.overlaps(&self.nv_counters)
    }
}
