//! Mempool admission against a live chain

mod common;

use common::*;
use consensus_engine::block::build_coinbase;
use consensus_engine::mempool::MempoolValidationState;
use consensus_engine::network::ConsensusParams;
use consensus_engine::transaction::calculate_tx_id;
use consensus_engine::*;

/// A regtest chain of two blocks whose genesis coinbase is spendable.
fn funded_engine() -> (ConsensusEngine, OutPoint) {
    let params = ConsensusParams {
        coinbase_maturity: 1,
        ..ConsensusParams::regtest()
    };
    let engine = engine(params);
    mine(&engine, 4, 50 * COIN, vec![]);
    mine_empty(&engine, 1, 4);
    (engine, coinbase_outpoint(0, 50 * COIN))
}

fn submit(engine: &ConsensusEngine, tx: &Transaction) -> (Result<Hash>, MempoolValidationState) {
    let mut state = MempoolValidationState::new();
    let time = u64::from(block_time(next_height(engine)));
    let result = engine.accept_transaction(tx, time, &mut state);
    (result, state)
}

#[test]
fn test_accept_once() {
    let (engine, funding) = funded_engine();
    let tx = spend(funding, 49 * COIN);

    let (result, state) = submit(&engine, &tx);
    assert_eq!(result, Ok(calculate_tx_id(&tx)));
    assert!(state.is_valid());
    assert!(engine.mempool().contains(&calculate_tx_id(&tx)));

    let (result, state) = submit(&engine, &tx);
    assert_eq!(result, Err(ConsensusError::TxAlreadyKnown));
    assert_eq!(state.error, Some(ConsensusError::TxAlreadyKnown));
    assert_eq!(engine.mempool().len(), 1);
}

#[test]
fn test_double_spend_of_pool_input() {
    let (engine, funding) = funded_engine();
    submit(&engine, &spend(funding, 49 * COIN)).0.unwrap();

    let (result, state) = submit(&engine, &spend(funding, 48 * COIN));
    assert_eq!(result, Err(ConsensusError::MempoolConflict(funding)));
    assert!(!state.missing_inputs);
}

#[test]
fn test_orphan_is_flagged() {
    let (engine, funding) = funded_engine();
    let parent = spend(funding, 49 * COIN);
    let child = spend(OutPoint::new(calculate_tx_id(&parent), 0), 48 * COIN);

    let (result, state) = submit(&engine, &child);
    assert_eq!(result, Err(ConsensusError::MissingOrSpentInputs));
    assert!(state.missing_inputs);
    assert!(result.unwrap_err().is_temporary());

    submit(&engine, &parent).0.unwrap();
    assert!(submit(&engine, &child).0.is_ok());
    assert_eq!(engine.mempool().len(), 2);
}

#[test]
fn test_mined_transactions_leave_the_pool() {
    let (engine, funding) = funded_engine();
    let tx = spend(funding, 49 * COIN);
    let txid = submit(&engine, &tx).0.unwrap();

    mine(&engine, 4, 51 * COIN, vec![tx.clone()]);
    assert!(!engine.mempool().contains(&txid));
    assert!(engine.mempool().is_empty());

    // Now confirmed, the same transaction is known through the coin view.
    assert_eq!(submit(&engine, &tx).0, Err(ConsensusError::TxAlreadyKnown));
}

#[test]
fn test_block_conflict_evicts_pool_spend() {
    let (engine, funding) = funded_engine();
    let pooled = spend(funding, 49 * COIN);
    submit(&engine, &pooled).0.unwrap();

    let mined = spend(funding, 48 * COIN);
    mine(&engine, 4, 52 * COIN, vec![mined]);
    assert!(engine.mempool().is_empty());
    assert_eq!(submit(&engine, &pooled).0, Err(ConsensusError::MissingOrSpentInputs));
}

#[test]
fn test_reward_transactions_rejected() {
    let (engine, _) = funded_engine();
    let coinbase = build_coinbase(next_height(&engine), COIN, vec![0x51]);
    assert_eq!(submit(&engine, &coinbase).0, Err(ConsensusError::TxCoinbase));
}

#[test]
fn test_no_tip_no_admission() {
    let engine = engine(ConsensusParams::regtest());
    let (result, state) = submit(&engine, &spend(OutPoint::new([1; 32], 0), COIN));
    assert!(matches!(result, Err(ConsensusError::InvalidArgument(_))));
    assert!(!state.is_valid());
}

#[test]
fn test_concurrent_submissions_admit_once() {
    let (engine, funding) = funded_engine();
    let tx = spend(funding, 49 * COIN);

    let results: Vec<Result<Hash>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| submit(&engine, &tx).0)).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| *err == ConsensusError::TxAlreadyKnown));
    assert_eq!(engine.mempool().len(), 1);
}

#[test]
fn test_concurrent_conflicting_spends_admit_one() {
    let (engine, funding) = funded_engine();
    let first = spend(funding, 49 * COIN);
    let second = spend(funding, 48 * COIN);

    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| submit(&engine, &first).0);
        let b = scope.spawn(|| submit(&engine, &second).0);
        (a.join().unwrap(), b.join().unwrap())
    });

    assert!(a.is_ok() != b.is_ok());
    let rejected = if a.is_ok() { b } else { a };
    assert_eq!(rejected, Err(ConsensusError::MempoolConflict(funding)));
    assert_eq!(engine.mempool().len(), 1);
}

#[test]
fn test_disconnect_evicts_spends_of_disconnected_outputs() {
    let (engine, funding) = funded_engine();
    let parent = spend(funding, 49 * COIN);
    mine(&engine, 4, 51 * COIN, vec![parent.clone()]);

    let child = spend(OutPoint::new(calculate_tx_id(&parent), 0), 48 * COIN);
    let grandchild = spend(OutPoint::new(calculate_tx_id(&child), 0), 47 * COIN);
    submit(&engine, &child).0.unwrap();
    submit(&engine, &grandchild).0.unwrap();
    assert_eq!(engine.mempool().len(), 2);

    engine.disconnect_tip().unwrap();
    assert!(engine.mempool().is_empty());

    // The disconnected parent can be offered again, then its child.
    submit(&engine, &parent).0.unwrap();
    submit(&engine, &child).0.unwrap();
    assert_eq!(engine.mempool().len(), 2);
}

#[test]
fn test_disconnect_keeps_spends_of_older_outputs() {
    let (engine, funding) = funded_engine();
    mine_empty(&engine, 1, 4);

    let tx = spend(funding, 49 * COIN);
    let txid = submit(&engine, &tx).0.unwrap();

    engine.disconnect_tip().unwrap();
    assert!(engine.mempool().contains(&txid));
}

#[test]
fn test_disconnect_evicts_spends_that_become_immature() {
    let params = ConsensusParams {
        coinbase_maturity: 2,
        ..ConsensusParams::regtest()
    };
    let engine = engine(params);
    mine(&engine, 4, 50 * COIN, vec![]);
    mine_empty(&engine, 1, 4);

    // Spendable in block 2; after the disconnect the next block is 1.
    let txid = submit(&engine, &spend(coinbase_outpoint(0, 50 * COIN), 49 * COIN)).0.unwrap();
    engine.disconnect_tip().unwrap();
    assert!(!engine.mempool().contains(&txid));
}
