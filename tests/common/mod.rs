//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use consensus_engine::block::{build_coinbase, compute_merkle_root};
use consensus_engine::chain::ChainedHeader;
use consensus_engine::coinview::InMemoryCoinView;
use consensus_engine::network::{ConsensusParams, ConsensusSettings};
use consensus_engine::script::{AcceptAllScripts, ScriptVerifier};
use consensus_engine::transaction::calculate_tx_id;
use consensus_engine::*;

pub const GENESIS_TIME: u32 = 1_600_000_000;
pub const SPACING: u32 = 600;

pub fn engine(params: ConsensusParams) -> ConsensusEngine {
    engine_with(params, ConsensusSettings::default(), Arc::new(AcceptAllScripts))
}

pub fn engine_with(
    params: ConsensusParams,
    settings: ConsensusSettings,
    verifier: Arc<dyn ScriptVerifier>,
) -> ConsensusEngine {
    ConsensusEngine::new(params, settings, Arc::new(InMemoryCoinView::new()), verifier).unwrap()
}

/// A block at the next height on `engine`'s tip, timestamped on a fixed
/// schedule so median time past grows with height.
pub fn next_block(engine: &ConsensusEngine, version: i32, transactions: Vec<Transaction>) -> Block {
    let (prev_block_hash, height) = match engine.tip() {
        Some(tip) => (tip.hash(), tip.height() + 1),
        None => ([0; 32], 0),
    };
    let txids: Vec<Hash> = transactions.iter().map(calculate_tx_id).collect();
    let (merkle_root, _) = compute_merkle_root(&txids);
    Block {
        header: BlockHeader {
            version,
            prev_block_hash,
            merkle_root,
            timestamp: block_time(height),
            bits: 0x207f_ffff,
            nonce: 0,
        },
        transactions,
    }
}

pub fn block_time(height: Height) -> u32 {
    GENESIS_TIME + height * SPACING
}

pub fn next_height(engine: &ConsensusEngine) -> Height {
    engine.tip().map(|tip| tip.height() + 1).unwrap_or(0)
}

/// Connects a block validated at its own timestamp.
pub fn connect(engine: &ConsensusEngine, block: &Block) -> Result<Arc<ChainedHeader>> {
    engine.connect_block(block, u64::from(block.header.timestamp))
}

/// Mines a block whose coinbase pays `reward`.
pub fn mine(engine: &ConsensusEngine, version: i32, reward: Amount, extra: Vec<Transaction>) -> Arc<ChainedHeader> {
    let mut transactions = vec![build_coinbase(next_height(engine), reward, vec![0x51])];
    transactions.extend(extra);
    let block = next_block(engine, version, transactions);
    connect(engine, &block).unwrap()
}

pub fn mine_empty(engine: &ConsensusEngine, count: u32, version: i32) {
    for _ in 0..count {
        mine(engine, version, 0, vec![]);
    }
}

pub fn spend(prevout: OutPoint, value: Amount) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout,
            script_sig: vec![0x51],
            sequence: u32::MAX,
        }],
        outputs: vec![TransactionOutput { value, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

/// First output of the coinbase of the block at `header`'s height, as
/// built by `mine`.
pub fn coinbase_outpoint(height: Height, reward: Amount) -> OutPoint {
    OutPoint::new(calculate_tx_id(&build_coinbase(height, reward, vec![0x51])), 0)
}
