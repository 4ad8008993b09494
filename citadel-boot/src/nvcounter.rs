// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Anti-rollback monotonic counter store.
//!
//! One fixed flash area holding a header element (fixed tag, written once
//! when the area is formatted) followed by append slots. Counters are never
//! mutated in place: each update appends a fresh `{id, value, crc}` element
//! and reading scans backward for the most recent CRC-valid element. The
//! area wear-levels itself by construction and survives power loss at any
//! element boundary.
//!
//! Not reentrant: single-threaded boot-time use only; callers serialize
//! access by owning the store.

use crate::crypto::crc16;
use crate::flash::{FlashDriver, FlashError, FlashGate};
use crate::layout::Region;
use crate::platform::Platform;

/// One log element: `value:32 | crc16:16 | id:16`, little-endian on flash.
pub const ELEMENT_SIZE: u32 = 8;

const ERASED_ELEMENT: u64 = u64::MAX;

/// Header element tag, written exactly once when the area is formatted.
const HEADER_ID: CounterId = CounterId(0x4855);
const HEADER_VALUE: u32 = 0xAADD_EECC;
const AREA_HEADER_SIZE: u32 = ELEMENT_SIZE;

/// Settle wait before formatting a virgin area, so a voltage rebounce at
/// first power-up does not interrupt the one unprotected init window.
const FORMAT_SETTLE_MS: u32 = 500;

/// Identifies one monotonic counter in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CounterId(pub u16);

impl CounterId {
    /// Version of the last firmware image accepted for installation.
    pub const FW_VERSION: CounterId = CounterId(3);
}

/// Counters formatted to zero when the area is initialized.
pub const TRACKED_COUNTERS: [CounterId; 1] = [CounterId::FW_VERSION];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvError {
    Flash(FlashError),
    /// Header element missing or invalid: the area was never fully
    /// formatted (or its init was interrupted) and must not be trusted.
    BadHeader,
    /// A stored element violates the log invariants (zeroed element, or
    /// counter history not strictly decreasing while scanning backward).
    Corrupt,
    /// No element found for the requested counter id.
    NotFound,
    /// Requested value below the current one.
    Rollback,
    /// Append slots exhausted; requires out-of-band re-provisioning.
    Full,
}

impl From<FlashError> for NvError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl NvError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flash(e) => e.as_str(),
            Self::BadHeader => "counter area header invalid",
            Self::Corrupt => "counter log corrupt",
            Self::NotFound => "counter not found",
            Self::Rollback => "counter rollback rejected",
            Self::Full => "counter log full",
        }
    }
}

fn pack(id: CounterId, value: u32) -> u64 {
    let crc = element_crc(id, value);
    (u64::from(value) << 32) | (u64::from(crc) << 16) | u64::from(id.0)
}

fn unpack(element: u64) -> (CounterId, u16, u32) {
    (
        CounterId(element as u16),
        (element >> 16) as u16,
        (element >> 32) as u32,
    )
}

/// CRC-16 over the 32-bit value then the 16-bit id; detects corruption and
/// economically binds the record to its counter.
fn element_crc(id: CounterId, value: u32) -> u16 {
    let mut buf = [0u8; 6];
    buf[..4].copy_from_slice(&value.to_le_bytes());
    buf[4..].copy_from_slice(&id.0.to_le_bytes());
    crc16(&buf)
}

/// Monotonic counter store over the layout's NV counter area.
pub struct NvCounterStore {
    area: Region,
    /// Offset of the next append slot.
    next_write: u32,
    /// Elements present in the area (header included).
    written: u32,
}

impl NvCounterStore {
    /// Open the store, formatting a virgin area first.
    ///
    /// Formatting (header element, then one zero element per tracked
    /// counter) is only unprotected against power loss on a virgin device;
    /// a half-finished format leaves the header or counter check below
    /// failing on the next boot, so it is detected and rejected rather than
    /// silently resumed.
    pub fn init<D: FlashDriver, P: Platform>(
        gate: &mut FlashGate<D>,
        plat: &mut P,
    ) -> Result<Self, NvError> {
        let area = gate.layout().nv_counters;
        let mut store = Self {
            area,
            next_write: AREA_HEADER_SIZE,
            written: 1,
        };

        if store.fully_erased(gate)? {
            plat.delay_ms(FORMAT_SETTLE_MS);
            gate.write(area.start, &pack(HEADER_ID, HEADER_VALUE).to_le_bytes())?;
            for id in TRACKED_COUNTERS {
                store.append(gate, id, 0)?;
            }
        }

        store.check_header(gate)?;
        // Every tracked counter must read back consistently before the area
        // is trusted.
        store.rebuild_cursor(gate)?;
        for id in TRACKED_COUNTERS {
            store.read(gate, id)?;
        }
        Ok(store)
    }

    /// Current value of `id`: scan backward from the area end; the first
    /// CRC-valid element wins. The remaining history must be strictly
    /// decreasing, anything else indicates corruption of the log.
    pub fn read<D: FlashDriver>(
        &self,
        gate: &FlashGate<D>,
        id: CounterId,
    ) -> Result<u32, NvError> {
        let mut offset = self.area.len - ELEMENT_SIZE;
        let mut found: Option<u32> = None;
        while offset >= AREA_HEADER_SIZE {
            let element = self.read_element(gate, offset)?;
            if element != ERASED_ELEMENT {
                if element == 0 {
                    // zero cannot be a valid record; it marks a cleaned or
                    // corrupted slot
                    return Err(NvError::Corrupt);
                }
                let (elem_id, crc, value) = unpack(element);
                if elem_id == id && crc == element_crc(elem_id, value) {
                    match found {
                        None => found = Some(value),
                        Some(newer) => {
                            if value >= newer {
                                return Err(NvError::Corrupt);
                            }
                        }
                    }
                }
            }
            offset -= ELEMENT_SIZE;
        }
        found.ok_or(NvError::NotFound)
    }

    /// Update `id` to `value`.
    ///
    /// Counters are monotonic non-decreasing: a lower value is rejected, an
    /// unchanged value is a no-op, and exhaustion of the append slots is
    /// fatal (no compaction in this design).
    pub fn write<D: FlashDriver>(
        &mut self,
        gate: &mut FlashGate<D>,
        id: CounterId,
        value: u32,
    ) -> Result<(), NvError> {
        let current = self.read(gate, id)?;
        if value < current {
            return Err(NvError::Rollback);
        }
        if value == current {
            return Ok(());
        }
        self.append(gate, id, value)?;
        #[cfg(feature = "defmt")]
        defmt::println!("nvcounter: id {} set to {}", id.0, value);
        Ok(())
    }

    /// Advance `id` by one.
    pub fn increment<D: FlashDriver>(
        &mut self,
        gate: &mut FlashGate<D>,
        id: CounterId,
    ) -> Result<(), NvError> {
        let current = self.read(gate, id)?;
        if current == u32::MAX {
            return Err(NvError::Full);
        }
        self.write(gate, id, current + 1)
    }

    /// Append slots still available.
    pub fn remaining(&self) -> u32 {
        self.max_elements() - self.written
    }

    fn max_elements(&self) -> u32 {
        self.area.len / ELEMENT_SIZE
    }

    fn append<D: FlashDriver>(
        &mut self,
        gate: &mut FlashGate<D>,
        id: CounterId,
        value: u32,
    ) -> Result<(), NvError> {
        if self.written >= self.max_elements() {
            return Err(NvError::Full);
        }
        let addr = self.area.start + self.next_write;
        gate.write(addr, &pack(id, value).to_le_bytes())?;
        self.next_write += ELEMENT_SIZE;
        self.written += 1;
        Ok(())
    }

    fn read_element<D: FlashDriver>(
        &self,
        gate: &FlashGate<D>,
        offset: u32,
    ) -> Result<u64, NvError> {
        let mut raw = [0u8; ELEMENT_SIZE as usize];
        gate.read(self.area.start + offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    fn fully_erased<D: FlashDriver>(&self, gate: &FlashGate<D>) -> Result<bool, NvError> {
        let mut offset = 0;
        while offset < self.area.len {
            if self.read_element(gate, offset)? != ERASED_ELEMENT {
                return Ok(false);
            }
            offset += ELEMENT_SIZE;
        }
        Ok(true)
    }

    fn check_header<D: FlashDriver>(&self, gate: &FlashGate<D>) -> Result<(), NvError> {
        let element = self.read_element(gate, 0)?;
        if element == ERASED_ELEMENT {
            return Err(NvError::BadHeader);
        }
        let (id, crc, value) = unpack(element);
        if id != HEADER_ID || value != HEADER_VALUE || crc != element_crc(id, value) {
            return Err(NvError::BadHeader);
        }
        Ok(())
    }

    /// Recover the append cursor: elements run contiguously from the header
    /// to the first erased slot.
    fn rebuild_cursor<D: FlashDriver>(&mut self, gate: &FlashGate<D>) -> Result<(), NvError> {
        self.next_write = AREA_HEADER_SIZE;
        self.written = 1;
        while self.next_write < self.area.len {
            if self.read_element(gate, self.next_write)? == ERASED_ELEMENT {
                break;
            }
            self.next_write += ELEMENT_SIZE;
            self.written += 1;
        }
        Ok(())
    }
}
