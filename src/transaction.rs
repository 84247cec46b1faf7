//! Transaction structure, finality and sequence lock functions

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

use crate::chain::ChainedHeader;
use crate::constants::*;
use crate::deployments::LockTimeFlags;
use crate::economic::total_output_value;
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// Context-free structural checks. A transaction tx = (v, ins, outs, lt) is valid iff:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. |tx| ≤ M_max_tx_size
/// 3. ∀o ∈ outs: 0 ≤ o.value ≤ M_max and Σ o.value ≤ M_max
/// 4. no two inputs spend the same outpoint
/// 5. coinbase script length within bounds, otherwise no null prevouts
pub fn check_transaction(tx: &Transaction) -> Result<()> {
    // 1. Inputs and outputs must not be empty
    if tx.inputs.is_empty() {
        return Err(ConsensusError::BadTransactionNoInput);
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::BadTransactionNoOutput);
    }

    // 2. Size limit
    if transaction_size(tx) > MAX_TX_SIZE {
        return Err(ConsensusError::BadTransactionOversize);
    }

    // 3. Output values
    if tx.outputs.iter().any(|o| o.value < 0) {
        return Err(ConsensusError::BadTransactionNegativeOutput);
    }
    total_output_value(tx)?;

    // 4. Duplicate inputs
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(ConsensusError::BadTransactionDuplicateInputs);
        }
    }

    // 5. Coinbase script size / null prevouts
    if is_coinbase(tx) {
        let len = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
            return Err(ConsensusError::BadCoinbaseSize);
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(ConsensusError::BadTransactionNullPrevout);
    }

    Ok(())
}

/// A coinbase has exactly one input spending the null outpoint.
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.inputs.len() == 1 && tx.inputs[0].prevout.is_null()
}

/// A coinstake spends real inputs and marks itself with an empty first output.
pub fn is_coinstake(tx: &Transaction) -> bool {
    !tx.inputs.is_empty()
        && !tx.inputs[0].prevout.is_null()
        && tx.outputs.len() >= 2
        && tx.outputs[0].is_empty()
}

/// Legacy serialization used for transaction ids and size limits.
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::with_capacity(transaction_size(tx));
    data.extend_from_slice(&tx.version.to_le_bytes());
    write_compact_size(&mut data, tx.inputs.len() as u64);
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_compact_size(&mut data, input.script_sig.len() as u64);
        data.extend_from_slice(&input.script_sig);
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_compact_size(&mut data, tx.outputs.len() as u64);
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_compact_size(&mut data, output.script_pubkey.len() as u64);
        data.extend_from_slice(&output.script_pubkey);
    }
    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data
}

/// Serialized size without building the byte string.
pub fn transaction_size(tx: &Transaction) -> usize {
    let inputs: usize = tx
        .inputs
        .iter()
        .map(|i| 36 + compact_size_len(i.script_sig.len() as u64) + i.script_sig.len() + 4)
        .sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|o| 8 + compact_size_len(o.script_pubkey.len() as u64) + o.script_pubkey.len())
        .sum();
    4 + compact_size_len(tx.inputs.len() as u64)
        + inputs
        + compact_size_len(tx.outputs.len() as u64)
        + outputs
        + 4
}

/// Transaction id: SHA256d of the serialization
pub fn calculate_tx_id(tx: &Transaction) -> Hash {
    sha256d::Hash::hash(&serialize_transaction(tx)).into_inner()
}

fn write_compact_size(data: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => data.push(n as u8),
        0xfd..=0xffff => {
            data.push(0xfd);
            data.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            data.push(0xfe);
            data.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            data.push(0xff);
            data.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// IsFinalTx: 𝒯𝒳 × ℕ × ℕ → {true, false}
///
/// A transaction is final when its lock time is zero, when the lock time is
/// below the block height (or block time for time-based locks), or when all
/// inputs carry the final sequence number.
pub fn is_final_tx(tx: &Transaction, block_height: Height, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }

    let cutoff = if tx.lock_time < LOCKTIME_THRESHOLD {
        block_height as i64
    } else {
        block_time
    };
    if (tx.lock_time as i64) < cutoff {
        return true;
    }

    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Sequence lock bookkeeping for relative time locks (BIP68).
///
/// `height` and `time` are the last height and median time at which the
/// transaction is still locked; -1 means unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPoints {
    pub height: i64,
    pub time: i64,
    /// Highest block holding one of the inputs, used to invalidate on reorg.
    pub max_input_height: Height,
}

impl LockPoints {
    pub fn unconstrained() -> Self {
        Self { height: -1, time: -1, max_input_height: 0 }
    }
}

impl Default for LockPoints {
    fn default() -> Self {
        Self::unconstrained()
    }
}

/// CalculateSequenceLocks
///
/// `prev_heights[i]` is the height of the coin spent by input i. `prev` is the
/// parent of the block the transaction would be included in.
pub fn calculate_sequence_locks(
    tx: &Transaction,
    flags: LockTimeFlags,
    prev_heights: &[Height],
    prev: &Arc<ChainedHeader>,
) -> LockPoints {
    let mut lock_points = LockPoints::unconstrained();
    lock_points.max_input_height = prev_heights.iter().copied().max().unwrap_or(0);

    let enforce = tx.version >= 2 && flags.contains(LockTimeFlags::VERIFY_SEQUENCE);
    if !enforce {
        return lock_points;
    }

    for (input, &coin_height) in tx.inputs.iter().zip(prev_heights) {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }

        let value = (input.sequence & SEQUENCE_LOCKTIME_MASK) as i64;
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            let coin_time = prev
                .get_ancestor(coin_height.saturating_sub(1))
                .map(|ancestor| ancestor.median_time_past())
                .unwrap_or_else(|| prev.median_time_past());
            let lock_time = coin_time + (value << SEQUENCE_LOCKTIME_GRANULARITY) - 1;
            lock_points.time = lock_points.time.max(lock_time);
        } else {
            let lock_height = coin_height as i64 + value - 1;
            lock_points.height = lock_points.height.max(lock_height);
        }
    }

    lock_points
}

/// EvaluateSequenceLocks: the lock is satisfied for a block on top of `prev`.
pub fn evaluate_sequence_locks(prev: &ChainedHeader, lock_points: &LockPoints) -> bool {
    let block_height = prev.height() as i64 + 1;
    let block_time = prev.median_time_past();
    lock_points.height < block_height && lock_points.time < block_time
}
