// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot state machine.
//!
//! Drives status check, verification, installation and launch in sequence,
//! persisting progress so any reset resumes correctly. Every failure path
//! converges on [`Outcome::Reset`] or [`Outcome::SecurityHalt`]; the core
//! never resets the system itself, the embedding driver loop matches on the
//! outcome and invokes the platform reset (which keeps the whole flow
//! testable with a mock platform).

use crate::bootinfo::{self, BootInfo, InstallPhase};
use crate::crypto::CryptoService;
use crate::error::Exception;
use crate::flash::{FlashDriver, FlashGate};
use crate::image::{self, ImageHeader, IMAGE_HEADER_SIZE};
use crate::layout::FlashLayout;
use crate::nvcounter::{CounterId, NvCounterStore, NvError};
use crate::platform::Platform;
use crate::swap;

/// Boots reaching the failure handler before retrying is refused.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Deliberate stall on the security-error path, slowing brute-force and
/// fault-injection attempts.
pub const SECURITY_STALL_MS: u32 = 1000;

/// Runtime knobs of the state machine.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootConfig {
    pub max_consecutive_failures: u32,
    pub security_stall_ms: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            security_stall_ms: SECURITY_STALL_MS,
        }
    }
}

/// States of the boot sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    CheckStatusOnReset,
    #[cfg(feature = "local-loader")]
    CheckNewFwToDownload,
    #[cfg(feature = "local-loader")]
    DownloadNewUserFw,
    VerifyUserFwStatus,
    VerifyUserFwSignature,
    ExecuteUserFw,
    HandleCriticalFailure,
}

impl BootState {
    /// Fallback exception when a state fails without a more specific cause
    /// recorded at the point of detection.
    pub fn generic_exception(&self) -> Exception {
        match self {
            Self::CheckStatusOnReset => Exception::CheckStatusOnResetErr,
            #[cfg(feature = "local-loader")]
            Self::CheckNewFwToDownload => Exception::CheckNewFwToDownloadErr,
            #[cfg(feature = "local-loader")]
            Self::DownloadNewUserFw => Exception::DownloadNewUserFwErr,
            Self::VerifyUserFwStatus => Exception::VerifyUserFwStatusErr,
            Self::VerifyUserFwSignature => Exception::VerifyUserFwSignatureErr,
            Self::ExecuteUserFw => Exception::ExecuteUserFwErr,
            Self::HandleCriticalFailure => Exception::Unknown,
        }
    }
}

/// Where to hand over execution once the boot sequence succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LaunchInfo {
    /// First payload address of the active slot.
    pub entry: u32,
    pub version: u32,
}

/// Terminal result of a boot pass, matched by the embedding driver loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Hand over to the verified firmware.
    Execute(LaunchInfo),
    /// Critical failure recorded; the caller must reset the system.
    Reset(Exception),
    /// Continuing would be unsafe. The deliberate stall has already been
    /// performed; the caller parks execution and must still issue an
    /// unconditional reset request so a skipped wait cannot bypass the
    /// stop (fault-injection hardening).
    SecurityHalt(Exception),
}

/// Source of downloadable candidates for loader configurations.
pub trait Loader<D: FlashDriver> {
    /// Whether a new candidate is available for download.
    fn check_new_fw(&mut self) -> bool;
    /// Fetch the candidate into the download slot.
    fn download(&mut self, gate: &mut FlashGate<D>) -> Result<(), Exception>;
}

/// Placeholder for builds without a local loader.
pub struct NoLoader;

impl<D: FlashDriver> Loader<D> for NoLoader {
    fn check_new_fw(&mut self) -> bool {
        false
    }

    fn download(&mut self, _gate: &mut FlashGate<D>) -> Result<(), Exception> {
        Err(Exception::DownloadNewUserFwErr)
    }
}

enum Transition {
    Next(BootState),
    Launch(LaunchInfo),
}

/// One step failed: with the specific cause captured at detection when
/// known, otherwise the generic per-state exception applies.
type StepError = Option<Exception>;

/// The boot context: every persistent and board resource, threaded
/// explicitly instead of living in globals.
pub struct SecureBoot<D, P, C, L = NoLoader> {
    flash: FlashGate<D>,
    plat: P,
    crypto: C,
    loader: L,
    config: BootConfig,
    info: BootInfo,
    counters: Option<NvCounterStore>,
    active_header: Option<ImageHeader>,
}

impl<D, P, C> SecureBoot<D, P, C, NoLoader>
where
    D: FlashDriver,
    P: Platform,
    C: CryptoService,
{
    pub fn new(driver: D, layout: FlashLayout, plat: P, crypto: C, config: BootConfig) -> Self {
        Self {
            flash: FlashGate::new(driver, layout),
            plat,
            crypto,
            loader: NoLoader,
            config,
            info: BootInfo::fresh(),
            counters: None,
            active_header: None,
        }
    }
}

impl<D, P, C, L> SecureBoot<D, P, C, L>
where
    D: FlashDriver,
    P: Platform,
    C: CryptoService,
    L: Loader<D>,
{
    /// Replace the loader seam (loader configurations).
    pub fn with_loader<L2: Loader<D>>(self, loader: L2) -> SecureBoot<D, P, C, L2> {
        SecureBoot {
            flash: self.flash,
            plat: self.plat,
            crypto: self.crypto,
            loader,
            config: self.config,
            info: self.info,
            counters: self.counters,
            active_header: self.active_header,
        }
    }

    /// Override the runtime knobs.
    pub fn with_config(mut self, config: BootConfig) -> Self {
        self.config = config;
        self
    }

    pub fn boot_info(&self) -> &BootInfo {
        &self.info
    }

    pub fn flash(&self) -> &FlashGate<D> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashGate<D> {
        &mut self.flash
    }

    pub fn platform(&mut self) -> &mut P {
        &mut self.plat
    }

    /// Tear the context apart, handing the driver back (host tools).
    pub fn into_driver(self) -> D {
        self.flash.into_driver()
    }

    /// Run the boot sequence to its terminal outcome.
    pub fn run(&mut self) -> Outcome {
        let mut state = BootState::CheckStatusOnReset;
        loop {
            trace_state(state);
            match self.step(state) {
                Ok(Transition::Next(next)) => state = next,
                Ok(Transition::Launch(launch)) => {
                    #[cfg(feature = "defmt")]
                    defmt::println!(
                        "boot: launching version {} at 0x{:08x}",
                        launch.version,
                        launch.entry
                    );
                    return Outcome::Execute(launch);
                }
                Err(specific) => return self.handle_critical_failure(state, specific),
            }
        }
    }

    /// Runtime exception entry point (watchdog pre-warning, faults,
    /// tamper), callable from interrupt context.
    ///
    /// Only non-reentrant-safe actions happen here: no buffered trace, just
    /// persisting the cause. The interrupted state machine is never
    /// resumed; the caller must reset.
    pub fn handle_irq_exception(&mut self, exception: Exception) -> Outcome {
        self.info.last_error = Exception::encode(Some(exception));
        self.info.consecutive_failures = self.info.consecutive_failures.saturating_add(1);
        let _ = bootinfo::store(&mut self.flash, &mut self.plat, &mut self.info);
        Outcome::Reset(exception)
    }

    /// Mark the current firmware as known good: clears the last error and
    /// the consecutive-failure counter. Called once the launched firmware
    /// proves itself.
    pub fn confirm_execution(&mut self) -> Result<(), Exception> {
        if self.info.consecutive_failures == 0 && self.info.last_error == 0 {
            return Ok(());
        }
        self.info.consecutive_failures = 0;
        self.info.last_error = Exception::encode(None);
        bootinfo::store(&mut self.flash, &mut self.plat, &mut self.info)
            .map_err(|_| Exception::FlashError)
    }

    fn step(&mut self, state: BootState) -> Result<Transition, StepError> {
        match state {
            BootState::CheckStatusOnReset => self.check_status_on_reset(),
            #[cfg(feature = "local-loader")]
            BootState::CheckNewFwToDownload => self.check_new_fw_to_download(),
            #[cfg(feature = "local-loader")]
            BootState::DownloadNewUserFw => self.download_new_user_fw(),
            BootState::VerifyUserFwStatus => self.verify_user_fw_status(),
            BootState::VerifyUserFwSignature => self.verify_user_fw_signature(),
            BootState::ExecuteUserFw => self.execute_user_fw(),
            // Reached only through the Err path of the other states.
            BootState::HandleCriticalFailure => Err(Some(Exception::Unknown)),
        }
    }

    fn check_status_on_reset(&mut self) -> Result<Transition, StepError> {
        self.info = match bootinfo::load(&self.flash) {
            Ok(Some(info)) => info,
            // Virgin device (or both copies corrupted): start from a fresh
            // record. Rollback trust lives in the counter area, not here.
            Ok(None) => BootInfo::fresh(),
            Err(_) => return Err(Some(Exception::FlashError)),
        };

        if let Some(previous) = Exception::decode(self.info.last_error) {
            // Reset-exception handling: report only, the record stays for
            // postmortem until a confirmed run clears it.
            trace_previous_error(previous);
        }

        if self.info.consecutive_failures >= self.config.max_consecutive_failures {
            // Too many consecutive failed boots: refuse to retry quietly.
            return Err(Exception::decode(self.info.last_error));
        }

        let counters = NvCounterStore::init(&mut self.flash, &mut self.plat)
            .map_err(|e| Some(nv_exception(e)))?;
        self.counters = Some(counters);

        #[cfg(feature = "local-loader")]
        return Ok(Transition::Next(BootState::CheckNewFwToDownload));
        #[cfg(not(feature = "local-loader"))]
        Ok(Transition::Next(BootState::VerifyUserFwStatus))
    }

    #[cfg(feature = "local-loader")]
    fn check_new_fw_to_download(&mut self) -> Result<Transition, StepError> {
        if self.loader.check_new_fw() {
            Ok(Transition::Next(BootState::DownloadNewUserFw))
        } else {
            Ok(Transition::Next(BootState::VerifyUserFwStatus))
        }
    }

    #[cfg(feature = "local-loader")]
    fn download_new_user_fw(&mut self) -> Result<Transition, StepError> {
        self.loader.download(&mut self.flash).map_err(Some)?;
        Ok(Transition::Next(BootState::VerifyUserFwStatus))
    }

    /// Decide the firmware situation: resume an interrupted installation,
    /// install a pending candidate, or carry on with the active image.
    fn verify_user_fw_status(&mut self) -> Result<Transition, StepError> {
        if self.info.phase() != InstallPhase::Idle {
            #[cfg(feature = "defmt")]
            defmt::println!(
                "boot: resuming installation at stripe {}",
                self.info.install_stripe
            );
            self.run_install()?;
            return Ok(Transition::Next(BootState::VerifyUserFwSignature));
        }

        if image::candidate_present(&self.flash) {
            let trusted = self.read_trusted_version()?;
            let candidate = ImageHeader::read_from(&self.flash, &self.flash.layout().download_slot)
                .map_err(|_| Some(Exception::FlashError))?;
            if candidate.version <= trusted {
                // Not new firmware: the recovery copy left by a completed
                // installation, or a stale resubmission. Nothing to do.
                #[cfg(feature = "defmt")]
                defmt::println!(
                    "boot: download slot holds version {} <= trusted {}, ignoring",
                    candidate.version,
                    trusted
                );
            } else {
                let header = image::verify_candidate(&self.flash, &mut self.crypto, trusted)
                    .map_err(Some)?;
                #[cfg(feature = "defmt")]
                defmt::println!("boot: installing candidate version {}", header.version);
                swap::start(&mut self.flash, &mut self.plat, &mut self.info, &header)
                    .map_err(|e| Some(e.to_exception()))?;
                self.run_install()?;
            }
        }

        Ok(Transition::Next(BootState::VerifyUserFwSignature))
    }

    fn verify_user_fw_signature(&mut self) -> Result<Transition, StepError> {
        let trusted = self.read_trusted_version()?;
        let header =
            image::verify_active(&self.flash, &mut self.crypto, trusted).map_err(Some)?;
        self.active_header = Some(header);
        Ok(Transition::Next(BootState::ExecuteUserFw))
    }

    fn execute_user_fw(&mut self) -> Result<Transition, StepError> {
        let Some(header) = self.active_header else {
            return Err(None);
        };
        // Count this boot as failed until the launched firmware confirms
        // itself; a crash before confirmation feeds the escalation policy.
        self.info.consecutive_failures = self.info.consecutive_failures.saturating_add(1);
        bootinfo::store(&mut self.flash, &mut self.plat, &mut self.info)
            .map_err(|_| Some(Exception::FlashError))?;

        Ok(Transition::Launch(LaunchInfo {
            entry: self.flash.layout().active_slot.start + IMAGE_HEADER_SIZE as u32,
            version: header.version,
        }))
    }

    fn run_install(&mut self) -> Result<(), StepError> {
        let Some(counters) = self.counters.as_mut() else {
            return Err(Some(Exception::NvCounterError));
        };
        swap::run(
            &mut self.flash,
            &mut self.plat,
            &mut self.crypto,
            counters,
            &mut self.info,
        )
        .map_err(|e| Some(e.to_exception()))
    }

    fn read_trusted_version(&mut self) -> Result<u32, StepError> {
        let Some(counters) = self.counters.as_ref() else {
            return Err(Some(Exception::NvCounterError));
        };
        counters
            .read(&self.flash, CounterId::FW_VERSION)
            .map_err(|e| Some(nv_exception(e)))
    }

    /// Record the failure and decide the terminal outcome.
    ///
    /// The specific cause captured at the point of detection has priority
    /// over the generic exception inferred from the failed state, so the
    /// postmortem can tell "a signature failed" from "something failed
    /// during the signature-check state".
    fn handle_critical_failure(&mut self, state: BootState, specific: StepError) -> Outcome {
        let exception = specific.unwrap_or_else(|| state.generic_exception());
        #[cfg(feature = "defmt")]
        defmt::error!("boot: critical failure: {}", exception.as_str());

        self.info.consecutive_failures = self.info.consecutive_failures.saturating_add(1);
        self.info.last_error = Exception::encode(Some(exception));
        // Best effort: an unwritable record must not mask the failure path.
        let _ = bootinfo::store(&mut self.flash, &mut self.plat, &mut self.info);

        if exception.is_security_error()
            || self.info.consecutive_failures > self.config.max_consecutive_failures
        {
            self.plat.delay_ms(self.config.security_stall_ms);
            Outcome::SecurityHalt(exception)
        } else {
            Outcome::Reset(exception)
        }
    }
}

fn nv_exception(e: NvError) -> Exception {
    match e {
        NvError::Full => Exception::NvCounterFull,
        NvError::Flash(_) => Exception::FlashError,
        _ => Exception::NvCounterError,
    }
}

#[allow(unused_variables)]
fn trace_state(state: BootState) {
    #[cfg(feature = "defmt")]
    defmt::println!("boot: state {:?}", state);
}

#[allow(unused_variables)]
fn trace_previous_error(previous: Exception) {
    #[cfg(feature = "defmt")]
    defmt::warn!("boot: previous execution error: {}", previous.as_str());
}
