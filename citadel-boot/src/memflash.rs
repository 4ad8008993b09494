// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory flash device for host tests and tools.
//!
//! Models NOR flash behavior where it matters for correctness testing:
//! erased bytes read as `0xFF`, programming requires an erased target, and
//! erase works on whole pages. Fault-injection knobs simulate dying devices
//! (operation budget with partial writes), bit corruption after program and
//! stuck error flags.

use crate::flash::{FlashDriver, FlashError};
use crate::layout::FlashLayout;

pub const ERASED: u8 = 0xFF;

/// Simulated power loss or device failure raised by [`MemFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    /// Fail after this many more erase/program operations, leaving the
    /// interrupted program half-applied.
    Budget(u32),
}

pub struct MemFlash {
    base: u32,
    page_size: u32,
    mem: Vec<u8>,
    fault: Fault,
    /// Flip one bit of the next programmed chunk (read-back mismatch).
    pub corrupt_next_program: bool,
    /// Make `clear_errors` fail.
    pub stuck_errors: bool,
    /// Erase/program operations performed so far.
    pub ops: u32,
}

impl MemFlash {
    /// A device spanning `[base, base + len)`, fully erased.
    pub fn new(base: u32, len: u32, page_size: u32) -> Self {
        assert!(page_size.is_power_of_two());
        assert_eq!(base % page_size, 0);
        assert_eq!(len % page_size, 0);
        Self {
            base,
            page_size,
            mem: vec![ERASED; len as usize],
            fault: Fault::None,
            corrupt_next_program: false,
            stuck_errors: false,
            ops: 0,
        }
    }

    /// A device just covering every region of `layout`.
    pub fn covering(layout: &FlashLayout) -> Self {
        let regions = [
            layout.active_slot,
            layout.download_slot,
            layout.swap,
            layout.boot_info,
            layout.nv_counters,
        ];
        let base = regions.iter().map(|r| r.start).min().unwrap();
        let end = regions.iter().map(|r| r.end()).max().unwrap();
        let base = base - base % layout.page_size;
        let len = (end - base).next_multiple_of(layout.page_size);
        Self::new(base, len, layout.page_size)
    }

    /// Fail (with a half-applied program) after `ops` more operations.
    pub fn set_op_budget(&mut self, ops: u32) {
        self.fault = Fault::Budget(ops);
    }

    pub fn clear_faults(&mut self) {
        self.fault = Fault::None;
        self.corrupt_next_program = false;
        self.stuck_errors = false;
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, FlashError> {
        let off = addr.checked_sub(self.base).ok_or(FlashError::OutOfRegion)? as usize;
        if off + len > self.mem.len() {
            return Err(FlashError::OutOfRegion);
        }
        Ok(off)
    }

    /// Whether the operation budget is exhausted by this operation.
    fn spend_op(&mut self) -> bool {
        self.ops += 1;
        match &mut self.fault {
            Fault::None => false,
            Fault::Budget(n) => {
                if *n == 0 {
                    true
                } else {
                    *n -= 1;
                    false
                }
            }
        }
    }

    /// Full device dump, for before/after comparisons.
    pub fn snapshot(&self) -> Vec<u8> {
        self.mem.clone()
    }

    /// Direct content access for test assertions.
    pub fn content(&self, addr: u32, len: usize) -> &[u8] {
        let off = self.offset(addr, len).expect("content range");
        &self.mem[off..off + len]
    }

    /// Direct content mutation for test setups (bypasses NOR semantics).
    pub fn patch(&mut self, addr: u32, data: &[u8]) {
        let off = self.offset(addr, data.len()).expect("patch range");
        self.mem[off..off + data.len()].copy_from_slice(data);
    }
}

impl FlashDriver for MemFlash {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        if addr % self.page_size != 0 || len % self.page_size != 0 {
            return Err(FlashError::Alignment);
        }
        let off = self.offset(addr, len as usize)?;
        if self.spend_op() {
            // Power lost mid-erase: first page gone, rest untouched.
            let partial = (self.page_size as usize).min(len as usize);
            self.mem[off..off + partial].fill(ERASED);
            return Err(FlashError::Erase);
        }
        self.mem[off..off + len as usize].fill(ERASED);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let off = self.offset(addr, data.len())?;
        if self.mem[off..off + data.len()].iter().any(|&b| b != ERASED) {
            // NOR flash: programming over non-erased content
            return Err(FlashError::Program);
        }
        if self.spend_op() {
            // Power lost mid-program: only the first half lands.
            let partial = data.len() / 2;
            self.mem[off..off + partial].copy_from_slice(&data[..partial]);
            return Err(FlashError::Program);
        }
        self.mem[off..off + data.len()].copy_from_slice(data);
        if self.corrupt_next_program {
            self.corrupt_next_program = false;
            self.mem[off] ^= 0x01;
        }
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let off = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[off..off + buf.len()]);
        Ok(())
    }

    fn mem_slice(&self, addr: u32, len: u32) -> Result<&[u8], FlashError> {
        let off = self.offset(addr, len as usize)?;
        Ok(&self.mem[off..off + len as usize])
    }

    fn clear_errors(&mut self) -> Result<(), FlashError> {
        if self.stuck_errors {
            Err(FlashError::ClearErrors)
        } else {
            Ok(())
        }
    }
}
