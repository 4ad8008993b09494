// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Secure boot and secure firmware update core.
//!
//! This crate implements the trusted half of a dual-slot bootloader:
//! verification of signed (optionally encrypted) firmware images, a
//! crash-safe swap installer, an anti-rollback monotonic counter store and
//! the boot state machine that sequences them. Board specifics stay behind
//! two narrow seams: [`FlashDriver`] for the low-level flash device and
//! [`Platform`] for delays and watchdog refresh.
//!
//! The crate supports both `no_std` (target) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: enables host support, including the [`memflash`]
//!   in-memory flash double used by tests and host tools
//! - `defmt` feature: enables `defmt` formatting and trace output

#![cfg_attr(not(feature = "std"), no_std)]

pub mod boot_fsm;
pub mod bootinfo;
pub mod crypto;
pub mod error;
pub mod flash;
pub mod image;
pub mod layout;
pub mod nvcounter;
pub mod platform;
pub mod swap;

// In-memory flash driver for host tests and tools (requires std feature)
#[cfg(feature = "std")]
pub mod memflash;

// Re-export commonly used types
pub use boot_fsm::{BootConfig, BootState, LaunchInfo, Outcome, SecureBoot};
pub use bootinfo::{BootInfo, InstallPhase};
pub use crypto::{CryptoService, SoftCrypto};
pub use error::Exception;
pub use flash::{FlashDriver, FlashError, FlashGate};
pub use image::{ImageHeader, IMAGE_HEADER_SIZE, IMAGE_MAGIC};
pub use layout::{FlashLayout, Region};
pub use nvcounter::{CounterId, NvCounterStore};
pub use platform::Platform;

#[cfg(feature = "std")]
pub use memflash::MemFlash;
#[cfg(feature = "std")]
pub use platform::MockPlatform;
