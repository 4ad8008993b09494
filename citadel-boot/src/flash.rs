// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash access policy over the low-level driver.
//!
//! The driver only knows how to erase, program and read the device. The
//! [`FlashGate`] wraps it with the rules the rest of the core relies on:
//! every access must land entirely inside one recognized region, the
//! installed-image header is only writable through the privileged
//! crate-internal path, stale device errors are cleared before each
//! erase/program sequence, long erases run in small bursts with a watchdog
//! refresh in between, and every program is read back and compared.

use crate::layout::FlashLayout;
use crate::platform::Platform;

/// Pages erased per driver call before the watchdog is refreshed.
const PAGES_PER_ERASE_BURST: u32 = 2;

/// Readback chunk for post-program verification.
const VERIFY_CHUNK: usize = 256;

/// Flash failure modes, reported by the driver or the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Access does not fall entirely within one recognized region, or
    /// touches the protected header without privilege.
    OutOfRegion,
    /// Address or length not aligned to the device write/erase granularity.
    Alignment,
    /// Device reported an erase failure.
    Erase,
    /// Device reported a programming failure.
    Program,
    /// Programming reported success but the read-back content differs.
    WriteControl,
    /// Stale error flags from a previous operation could not be cleared.
    ClearErrors,
}

impl FlashError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfRegion => "access outside recognized region",
            Self::Alignment => "unaligned access",
            Self::Erase => "erase failed",
            Self::Program => "program failed",
            Self::WriteControl => "write control mismatch",
            Self::ClearErrors => "error flags stuck",
        }
    }
}

/// Low-level flash device interface, provided by the board layer.
///
/// The core never touches flash registers; the driver returns specific
/// failures and the gate turns them into policy decisions.
pub trait FlashDriver {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError>;
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Borrow a memory-mapped view of flash content.
    ///
    /// Used to digest large regions without an intermediate copy; on
    /// memory-mapped devices this is a plain address-range borrow.
    fn mem_slice(&self, addr: u32, len: u32) -> Result<&[u8], FlashError>;

    /// Clear error flags left over from a previous operation.
    fn clear_errors(&mut self) -> Result<(), FlashError>;
}

/// Region-checked flash access for the whole core.
pub struct FlashGate<D> {
    driver: D,
    layout: FlashLayout,
}

impl<D: FlashDriver> FlashGate<D> {
    /// Wrap a driver. The layout must satisfy [`FlashLayout::validate`];
    /// the default layout is checked at compile time.
    pub fn new(driver: D, layout: FlashLayout) -> Self {
        debug_assert!(layout.validate());
        Self { driver, layout }
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Direct driver access, for board glue and test setups.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The region containing the whole access, if exactly one does.
    /// Straddling a region boundary leaves the access unrecognized.
    fn region_of(&self, addr: u32, len: u32) -> Option<&crate::layout::Region> {
        let l = &self.layout;
        [
            &l.active_slot,
            &l.download_slot,
            &l.swap,
            &l.boot_info,
            &l.nv_counters,
        ]
        .into_iter()
        .find(|r| r.contains(addr, len))
    }

    fn check_region(&self, addr: u32, len: u32, privileged: bool) -> Result<(), FlashError> {
        if self.region_of(addr, len).is_none() {
            return Err(FlashError::OutOfRegion);
        }
        let protected = self.layout.protected_header();
        if !privileged && len != 0 && protected.overlaps(&crate::layout::Region::new(addr, len)) {
            return Err(FlashError::OutOfRegion);
        }
        Ok(())
    }

    /// Erase `len` bytes starting at `addr` (page-aligned both).
    pub fn erase(
        &mut self,
        plat: &mut impl Platform,
        addr: u32,
        len: u32,
    ) -> Result<(), FlashError> {
        self.check_region(addr, len, false)?;
        self.erase_unchecked(plat, addr, len)
    }

    /// Privileged erase that may touch the protected header sub-region.
    pub(crate) fn erase_privileged(
        &mut self,
        plat: &mut impl Platform,
        addr: u32,
        len: u32,
    ) -> Result<(), FlashError> {
        self.check_region(addr, len, true)?;
        self.erase_unchecked(plat, addr, len)
    }

    fn erase_unchecked(
        &mut self,
        plat: &mut impl Platform,
        addr: u32,
        len: u32,
    ) -> Result<(), FlashError> {
        if len == 0 {
            return Ok(());
        }
        let page = self.layout.page_size;
        if addr % page != 0 || len % page != 0 {
            return Err(FlashError::Alignment);
        }
        self.driver.clear_errors().map_err(|_| FlashError::ClearErrors)?;

        // Erase in short bursts so a large erase cannot starve the watchdog.
        let burst = PAGES_PER_ERASE_BURST * page;
        let mut off = 0u32;
        while off < len {
            let chunk = burst.min(len - off);
            self.driver.erase(addr + off, chunk)?;
            plat.watchdog_refresh();
            off += chunk;
        }
        Ok(())
    }

    /// Program `data` at `addr` and verify the written content.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check_region(addr, data.len() as u32, false)?;
        self.write_unchecked(addr, data)
    }

    /// Privileged write that may touch the protected header sub-region.
    pub(crate) fn write_privileged(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check_region(addr, data.len() as u32, true)?;
        self.write_unchecked(addr, data)
    }

    fn write_unchecked(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        let align = self.layout.write_align;
        if addr % align != 0 || data.len() as u32 % align != 0 {
            return Err(FlashError::Alignment);
        }
        self.driver.clear_errors().map_err(|_| FlashError::ClearErrors)?;
        self.driver.program(addr, data)?;

        // Read back and compare; a silent mismatch is reported distinctly
        // from a raw programming failure.
        let mut chunk = [0u8; VERIFY_CHUNK];
        let mut off = 0usize;
        while off < data.len() {
            let n = VERIFY_CHUNK.min(data.len() - off);
            self.driver.read(addr + off as u32, &mut chunk[..n])?;
            if chunk[..n] != data[off..off + n] {
                return Err(FlashError::WriteControl);
            }
            off += n;
        }
        Ok(())
    }

    /// Read `buf.len()` bytes from `addr`.
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.region_of(addr, buf.len() as u32).is_none() {
            return Err(FlashError::OutOfRegion);
        }
        self.driver.read(addr, buf)
    }

    /// Borrow a memory-mapped view of `len` bytes at `addr`.
    pub fn mem_slice(&self, addr: u32, len: u32) -> Result<&[u8], FlashError> {
        if self.region_of(addr, len).is_none() {
            return Err(FlashError::OutOfRegion);
        }
        self.driver.mem_slice(addr, len)
    }
}
