// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Exception taxonomy shared by every component.
//!
//! Two tiers: runtime exceptions raised from interrupt context (watchdog
//! pre-warning, faults, tamper) and state-machine errors surfaced by the
//! boot sequence itself. Both persist into the boot-status record as a
//! `u32`, so the variant set is closed and the encoding is stable.

/// A specific failure point, persisted for post-reset diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Exception {
    // Runtime tier: detected by hardware / IRQ handlers.
    WatchdogReset = 1,
    MemoryFault = 2,
    HardFault = 3,
    TamperingFault = 4,

    // Generic per-state errors, derived from the state that failed when no
    // more specific cause was recorded at detection time.
    CheckStatusOnResetErr = 5,
    CheckNewFwToDownloadErr = 6,
    DownloadNewUserFwErr = 7,
    VerifyUserFwStatusErr = 8,
    VerifyUserFwSignatureErr = 9,
    ExecuteUserFwErr = 10,

    // Specific causes recorded at the point of detection.
    IncorrectBinary = 11,
    InconsistentFwSize = 12,
    FwTooBig = 13,
    IncorrectVersion = 14,
    HeaderAuthFailed = 15,
    SignatureFailure = 16,
    DecryptFailure = 17,
    FlashError = 18,
    NvCounterError = 19,
    NvCounterFull = 20,

    Unknown = 21,
}

impl Exception {
    /// Encode an optional exception for persistence; 0 means "none".
    pub fn encode(value: Option<Exception>) -> u32 {
        match value {
            None => 0,
            Some(e) => e as u32,
        }
    }

    /// Decode a persisted value. Unrecognized codes come back as `Unknown`
    /// rather than being dropped: a corrupted code is still an error record.
    pub fn decode(raw: u32) -> Option<Exception> {
        Some(match raw {
            0 => return None,
            1 => Self::WatchdogReset,
            2 => Self::MemoryFault,
            3 => Self::HardFault,
            4 => Self::TamperingFault,
            5 => Self::CheckStatusOnResetErr,
            6 => Self::CheckNewFwToDownloadErr,
            7 => Self::DownloadNewUserFwErr,
            8 => Self::VerifyUserFwStatusErr,
            9 => Self::VerifyUserFwSignatureErr,
            10 => Self::ExecuteUserFwErr,
            11 => Self::IncorrectBinary,
            12 => Self::InconsistentFwSize,
            13 => Self::FwTooBig,
            14 => Self::IncorrectVersion,
            15 => Self::HeaderAuthFailed,
            16 => Self::SignatureFailure,
            17 => Self::DecryptFailure,
            18 => Self::FlashError,
            19 => Self::NvCounterError,
            20 => Self::NvCounterFull,
            _ => Self::Unknown,
        })
    }

    /// Whether continuing execution after this exception would itself be
    /// unsafe. These take the stall-then-reset path instead of a plain reset.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            Self::TamperingFault
                | Self::IncorrectVersion
                | Self::HeaderAuthFailed
                | Self::SignatureFailure
                | Self::DecryptFailure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WatchdogReset => "watchdog reset",
            Self::MemoryFault => "memory fault",
            Self::HardFault => "hard fault",
            Self::TamperingFault => "tampering fault",
            Self::CheckStatusOnResetErr => "status check failed",
            Self::CheckNewFwToDownloadErr => "download check failed",
            Self::DownloadNewUserFwErr => "download failed",
            Self::VerifyUserFwStatusErr => "firmware status check failed",
            Self::VerifyUserFwSignatureErr => "firmware verification failed",
            Self::ExecuteUserFwErr => "firmware launch failed",
            Self::IncorrectBinary => "incorrect binary image",
            Self::InconsistentFwSize => "inconsistent firmware size",
            Self::FwTooBig => "image too big for slot",
            Self::IncorrectVersion => "forbidden version",
            Self::HeaderAuthFailed => "header authentication failed",
            Self::SignatureFailure => "signature check failed",
            Self::DecryptFailure => "decrypt failure",
            Self::FlashError => "flash error",
            Self::NvCounterError => "counter store error",
            Self::NvCounterFull => "counter store full",
            Self::Unknown => "unknown failure",
        }
    }
}
