//! Soft-fork activation as seen from connected blocks

mod common;

use common::*;
use consensus_engine::deployments::{LockTimeFlags, ScriptFlags};
use consensus_engine::network::{Bip9Deployment, ConsensusParams, DEPLOYMENT_CSV, DEPLOYMENT_TESTDUMMY};
use consensus_engine::threshold::ThresholdState;
use consensus_engine::*;

const WINDOW: u32 = 100;
const THRESHOLD: u32 = 75;

const SIGNAL_DUMMY: i32 = VERSIONBITS_TOP_BITS | (1 << 28);
const SIGNAL_BOTH: i32 = VERSIONBITS_TOP_BITS | (1 << 28) | 1;

fn params(start_time: i64, timeout: i64) -> ConsensusParams {
    let mut params = ConsensusParams::regtest();
    params.miner_confirmation_window = WINDOW;
    params.rule_change_activation_threshold = THRESHOLD;
    params.deployments[DEPLOYMENT_TESTDUMMY] = Bip9Deployment::new("testdummy", 28, start_time, timeout);
    params
}

/// Mines one window with `signalling` signalling blocks first.
fn mine_window(engine: &ConsensusEngine, signalling: u32, version: i32) {
    mine_empty(engine, signalling, version);
    mine_empty(engine, WINDOW - signalling, 4);
}

#[test]
fn test_defined_until_start_time() {
    let engine = engine(params(i64::from(GENESIS_TIME) + 1_000_000, NO_TIMEOUT));
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Defined);

    mine_window(&engine, WINDOW, SIGNAL_DUMMY);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Defined);
    assert_eq!(engine.deployment_state(DEPLOYMENT_CSV).unwrap(), ThresholdState::Started);
}

#[test]
fn test_full_activation_cycle() {
    let engine = engine(params(0, NO_TIMEOUT));

    mine_window(&engine, 0, 4);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Started);
    assert_eq!(engine.block_version(), SIGNAL_BOTH);

    mine_window(&engine, THRESHOLD, SIGNAL_BOTH);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::LockedIn);
    assert_eq!(engine.deployment_state(DEPLOYMENT_CSV).unwrap(), ThresholdState::LockedIn);
    assert_eq!(engine.block_version(), SIGNAL_BOTH);

    mine_window(&engine, 0, 4);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Active);
    assert_eq!(engine.block_version(), VERSIONBITS_TOP_BITS);

    // The tip itself was validated under the LockedIn state; its child is not.
    let tip_flags = engine.flags_at_tip().unwrap();
    assert!(!tip_flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE));

    mine_empty(&engine, 1, 4);
    let flags = engine.flags_at_tip().unwrap();
    assert!(flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE | LockTimeFlags::MEDIAN_TIME_PAST));
    assert!(flags.script_flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY));
}

#[test]
fn test_one_short_of_threshold_stays_started() {
    let engine = engine(params(0, NO_TIMEOUT));
    mine_window(&engine, 0, 4);
    mine_window(&engine, THRESHOLD - 1, SIGNAL_DUMMY);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Started);
}

#[test]
fn test_timeout_beats_signalling() {
    // The second window boundary has a median time past beyond the timeout.
    let engine = engine(params(0, i64::from(GENESIS_TIME) + 100_000));
    mine_window(&engine, 0, 4);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Started);

    mine_window(&engine, WINDOW, SIGNAL_DUMMY);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Failed);

    mine_window(&engine, WINDOW, SIGNAL_DUMMY);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Failed);
}

#[test]
fn test_window_statistics() {
    let engine = engine(params(0, NO_TIMEOUT));
    mine_window(&engine, 0, 4);
    mine_empty(&engine, 30, SIGNAL_DUMMY);
    mine_empty(&engine, 10, 4);

    let stats = engine.deployment_statistics(DEPLOYMENT_TESTDUMMY).unwrap();
    assert_eq!(stats.period, WINDOW);
    assert_eq!(stats.threshold, THRESHOLD);
    assert_eq!(stats.elapsed, 40);
    assert_eq!(stats.count, 30);
    assert!(stats.possible);

    mine_empty(&engine, 16, 4);
    let stats = engine.deployment_statistics(DEPLOYMENT_TESTDUMMY).unwrap();
    assert_eq!(stats.elapsed, 56);
    assert!(!stats.possible);
}

#[test]
fn test_always_active_deployment() {
    let mut params = params(0, NO_TIMEOUT);
    params.deployments[DEPLOYMENT_TESTDUMMY].start_time = ALWAYS_ACTIVE;
    let engine = engine(params);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Active);
    mine_empty(&engine, 1, 4);
    assert_eq!(engine.deployment_state(DEPLOYMENT_TESTDUMMY).unwrap(), ThresholdState::Active);
}

#[test]
fn test_unknown_deployment() {
    let engine = engine(ConsensusParams::regtest());
    assert!(matches!(engine.deployment_state(7), Err(ConsensusError::InvalidArgument(_))));
    assert!(matches!(engine.deployment_statistics(7), Err(ConsensusError::InvalidArgument(_))));
}

#[test]
fn test_flags_are_stable() {
    let engine = engine(ConsensusParams::regtest());
    assert!(engine.flags_at_tip().is_err());
    mine_empty(&engine, 3, 4);

    let first = engine.flags_at_tip().unwrap();
    let second = engine.flags_at_tip().unwrap();
    assert_eq!(first, second);
    assert!(first.enforce_bip34);
    assert!(first.script_flags.contains(ScriptFlags::P2SH | ScriptFlags::WITNESS));
}
