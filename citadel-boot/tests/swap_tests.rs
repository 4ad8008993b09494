// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Installation engine tests: byte-exact swaps, crash-safe resume at every
//! interruption point, and the commit ordering.

mod common;

use citadel_boot::bootinfo::{self, BootInfo, InstallPhase};
use citadel_boot::flash::{FlashGate, FlashError};
use citadel_boot::image::{self, ImageHeader, IMAGE_HEADER_SIZE};
use citadel_boot::nvcounter::{CounterId, NvCounterStore};
use citadel_boot::swap::{self, InstallError};
use citadel_boot::{MemFlash, MockPlatform, SoftCrypto};
use common::{build_image, payload, place_image, small_layout, soft_crypto, SLOT_LEN};

const FW: CounterId = CounterId::FW_VERSION;

struct Env {
    gate: FlashGate<MemFlash>,
    plat: MockPlatform,
    crypto: SoftCrypto,
    counters: NvCounterStore,
    info: BootInfo,
}

/// Device with `old` installed as version 1 in the active slot and the
/// counter committed to match.
fn setup(old: &[u8]) -> Env {
    let layout = small_layout();
    let mut mem = MemFlash::covering(&layout);
    let old_image = build_image(old, 1, false);
    place_image(&mut mem, &layout.active_slot, &old_image);

    let mut gate = FlashGate::new(mem, layout);
    let mut plat = MockPlatform::new();
    let mut counters = NvCounterStore::init(&mut gate, &mut plat).expect("counter init");
    counters.write(&mut gate, FW, 1).expect("seed counter");

    let mut info = BootInfo::fresh();
    info.active_version = 1;
    bootinfo::store(&mut gate, &mut plat, &mut info).expect("seed boot info");

    Env {
        gate,
        plat,
        crypto: soft_crypto(),
        counters,
        info,
    }
}

fn place_candidate(env: &mut Env, image: &[u8]) {
    let download = env.gate.layout().download_slot.start;
    env.gate.driver_mut().patch(download, image);
}

fn install(env: &mut Env, image: &[u8]) -> Result<(), InstallError> {
    place_candidate(env, image);
    let header = image::verify_candidate(&env.gate, &mut env.crypto, 1).expect("candidate");
    swap::start(&mut env.gate, &mut env.plat, &mut env.info, &header)?;
    swap::run(
        &mut env.gate,
        &mut env.plat,
        &mut env.crypto,
        &mut env.counters,
        &mut env.info,
    )
}

fn active_header(env: &Env) -> ImageHeader {
    ImageHeader::read_from(&env.gate, &env.gate.layout().active_slot).unwrap()
}

fn read_payload(env: &Env, slot_start: u32, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    env.gate
        .read(slot_start + IMAGE_HEADER_SIZE as u32, &mut out)
        .unwrap();
    out
}

// =============================================================================
// Complete installation
// =============================================================================

#[test]
fn test_install_leaves_active_slot_byte_identical() {
    let old = payload(1200);
    let new = payload(3000);
    let mut env = setup(&old);

    install(&mut env, &build_image(&new, 2, false)).expect("install");

    let header = active_header(&env);
    assert_eq!(header.version, 2);
    assert_eq!(
        read_payload(&env, env.gate.layout().active_slot.start, new.len()),
        new
    );
    // previous image parked in the download slot as the recovery copy
    let parked = ImageHeader::read_from(&env.gate, &env.gate.layout().download_slot).unwrap();
    assert_eq!(parked.version, 1);
    assert_eq!(
        read_payload(&env, env.gate.layout().download_slot.start, old.len()),
        old
    );
    // committed
    assert_eq!(env.counters.read(&env.gate, FW), Ok(2));
    assert_eq!(env.info.active_version, 2);
    assert_eq!(env.info.phase(), InstallPhase::Idle);
}

#[test]
fn test_install_decrypts_encrypted_candidate() {
    let old = payload(600);
    let new: Vec<u8> = (0..2500).map(|i| (i % 251) as u8).collect();
    let mut env = setup(&old);

    install(&mut env, &build_image(&new, 2, true)).expect("install");

    let header = active_header(&env);
    assert_eq!(header.version, 2);
    // plaintext in the slot, encryption flag cleared, CRC still valid
    assert!(!header.is_encrypted());
    assert!(header.crc_valid());
    assert_eq!(
        read_payload(&env, env.gate.layout().active_slot.start, new.len()),
        new
    );
    // the re-verification of the installed slot passes
    assert!(image::verify_active(&env.gate, &mut env.crypto, 2).is_ok());
}

#[test]
fn test_run_without_pending_install_is_noop() {
    let mut env = setup(&payload(500));
    let before = env.gate.driver().snapshot();
    swap::run(
        &mut env.gate,
        &mut env.plat,
        &mut env.crypto,
        &mut env.counters,
        &mut env.info,
    )
    .expect("idle run");
    assert_eq!(before, env.gate.driver().snapshot());
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn test_flash_error_aborts_install() {
    let mut env = setup(&payload(500));
    let image = build_image(&payload(900), 2, false);
    place_candidate(&mut env, &image);
    let header = image::verify_candidate(&env.gate, &mut env.crypto, 1).unwrap();
    swap::start(&mut env.gate, &mut env.plat, &mut env.info, &header).unwrap();

    env.gate.driver_mut().stuck_errors = true;
    let res = swap::run(
        &mut env.gate,
        &mut env.plat,
        &mut env.crypto,
        &mut env.counters,
        &mut env.info,
    );
    assert_eq!(res, Err(InstallError::Flash(FlashError::ClearErrors)));
    // progress marker still points at the interrupted step
    assert_ne!(env.info.phase(), InstallPhase::Idle);
}

#[test]
fn test_commit_runs_after_counter_but_before_cleanup() {
    let old = payload(700);
    let new = payload(1500);
    let mut env = setup(&old);
    let image = build_image(&new, 2, false);
    place_candidate(&mut env, &image);
    let header = image::verify_candidate(&env.gate, &mut env.crypto, 1).unwrap();
    swap::start(&mut env.gate, &mut env.plat, &mut env.info, &header).unwrap();

    // Step until the swap itself is done and only the commit remains.
    while env.info.phase() != InstallPhase::Commit {
        swap::next_step(
            &mut env.gate,
            &mut env.plat,
            &mut env.crypto,
            &mut env.counters,
            &mut env.info,
        )
        .expect("swap step");
    }

    // Swap finished: both images fully in place, but nothing committed yet.
    assert_eq!(env.counters.read(&env.gate, FW), Ok(1));
    assert_eq!(
        read_payload(&env, env.gate.layout().active_slot.start, new.len()),
        new
    );
    assert_eq!(
        read_payload(&env, env.gate.layout().download_slot.start, old.len()),
        old
    );

    swap::next_step(
        &mut env.gate,
        &mut env.plat,
        &mut env.crypto,
        &mut env.counters,
        &mut env.info,
    )
    .expect("commit");
    assert_eq!(env.counters.read(&env.gate, FW), Ok(2));
    assert_eq!(env.info.phase(), InstallPhase::Idle);
}

// =============================================================================
// Power-loss convergence
// =============================================================================

/// Interrupt the installation after every possible number of flash
/// operations, resume from persisted state, and require convergence to a
/// fully installed image every time.
#[test]
fn test_interrupted_install_converges_from_every_point() {
    interruption_sweep(false);
}

#[test]
fn test_interrupted_encrypted_install_converges_from_every_point() {
    interruption_sweep(true);
}

fn interruption_sweep(encrypted: bool) {
    let old = payload(SLOT_LEN as usize / 2);
    let new: Vec<u8> = (0..3200u32).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect();

    let mut interrupted_runs = 0u32;
    for budget in 0..200 {
        let mut env = setup(&old);
        let image = build_image(&new, 2, encrypted);
        place_candidate(&mut env, &image);
        let header = image::verify_candidate(&env.gate, &mut env.crypto, 1).unwrap();

        env.gate.driver_mut().set_op_budget(budget);
        let first = swap::start(&mut env.gate, &mut env.plat, &mut env.info, &header).and_then(
            |_| {
                swap::run(
                    &mut env.gate,
                    &mut env.plat,
                    &mut env.crypto,
                    &mut env.counters,
                    &mut env.info,
                )
            },
        );

        if first.is_err() {
            interrupted_runs += 1;
            env.gate.driver_mut().clear_faults();

            // Reboot: reload persisted state and drive to completion.
            let mut info = bootinfo::load(&env.gate)
                .expect("boot info area readable")
                .unwrap_or_else(BootInfo::fresh);
            let mut counters =
                NvCounterStore::init(&mut env.gate, &mut env.plat).expect("counter reopen");

            if info.phase() == InstallPhase::Idle {
                // Died before the initial progress marker: nothing was
                // destroyed, the installation simply restarts.
                assert_eq!(counters.read(&env.gate, FW), Ok(1));
                let header =
                    image::verify_candidate(&env.gate, &mut env.crypto, 1).expect("intact");
                swap::start(&mut env.gate, &mut env.plat, &mut info, &header).expect("restart");
            }
            swap::run(
                &mut env.gate,
                &mut env.plat,
                &mut env.crypto,
                &mut counters,
                &mut info,
            )
            .expect("resumed install");
            env.counters = counters;
            env.info = info;
        }

        // Converged: new image active and committed, old image parked.
        let header = active_header(&env);
        assert_eq!(header.version, 2, "budget {budget}");
        assert!(!header.is_encrypted());
        assert_eq!(
            read_payload(&env, env.gate.layout().active_slot.start, new.len()),
            new,
            "budget {budget}"
        );
        assert_eq!(
            read_payload(&env, env.gate.layout().download_slot.start, old.len()),
            old,
            "budget {budget}"
        );
        assert_eq!(env.counters.read(&env.gate, FW), Ok(2), "budget {budget}");

        if first.is_ok() {
            // Budget larger than a full installation: sweep is complete.
            assert!(interrupted_runs > 30);
            return;
        }
    }
    panic!("installation never completed within the sweep budget");
}
