//! Transaction pool storage and its coin view overlay

use std::collections::HashMap;

use tracing::debug;

use crate::coinview::{CoinView, FetchCoinsResponse};
use crate::error::{ConsensusError, Result};
use crate::transaction::{calculate_tx_id, LockPoints};
use crate::types::*;

/// An admitted transaction and what admission learned about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash,
    pub fee: Amount,
    pub size: usize,
    /// Admission time in seconds since the epoch.
    pub time: u64,
    /// Chain height when the entry was admitted.
    pub entry_height: Height,
    pub lock_points: LockPoints,
    pub spends_coinbase: bool,
}

impl MempoolEntry {
    /// Fee per 1000 bytes.
    pub fn fee_per_kb(&self) -> Amount {
        if self.size == 0 {
            return 0;
        }
        self.fee.saturating_mul(1000) / self.size as Amount
    }
}

/// Pool entries keyed by txid, plus an index of the outpoints they spend.
#[derive(Debug, Default)]
pub struct TxMempool {
    entries: HashMap<Hash, MempoolEntry>,
    spent_by: HashMap<OutPoint, Hash>,
    max_transactions: usize,
}

impl TxMempool {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            spent_by: HashMap::new(),
            max_transactions,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// The pool transaction spending `outpoint`, if any.
    pub fn spender(&self, outpoint: &OutPoint) -> Option<&Hash> {
        self.spent_by.get(outpoint)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_transactions
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Output `outpoint` of a pool transaction, if that transaction is pooled.
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.entries
            .get(&outpoint.hash)
            .and_then(|entry| entry.tx.outputs.get(outpoint.index as usize))
    }

    /// Inserts a validated entry.
    ///
    /// Duplicates, conflicts and capacity are re-checked here because the
    /// pool may have changed since the entry was validated.
    pub fn add_unchecked(&mut self, entry: MempoolEntry) -> Result<()> {
        if self.entries.contains_key(&entry.txid) {
            return Err(ConsensusError::TxAlreadyKnown);
        }
        if let Some(input) = entry.tx.inputs.iter().find(|input| self.spent_by.contains_key(&input.prevout)) {
            return Err(ConsensusError::MempoolConflict(input.prevout));
        }
        if self.is_full() {
            return Err(ConsensusError::MempoolFull);
        }

        for input in &entry.tx.inputs {
            self.spent_by.insert(input.prevout, entry.txid);
        }
        self.entries.insert(entry.txid, entry);
        Ok(())
    }

    /// Removes one transaction, leaving its descendants pooled.
    pub fn remove(&mut self, txid: &Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            if self.spent_by.get(&input.prevout) == Some(txid) {
                self.spent_by.remove(&input.prevout);
            }
        }
        Some(entry)
    }

    /// Removes a transaction and every pool transaction that depends on it.
    pub fn remove_recursive(&mut self, txid: &Hash) -> Vec<MempoolEntry> {
        let mut removed = Vec::new();
        let mut pending = vec![*txid];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.remove(&next) {
                for index in 0..entry.tx.outputs.len() as u32 {
                    if let Some(child) = self.spent_by.get(&OutPoint::new(next, index)) {
                        pending.push(*child);
                    }
                }
                removed.push(entry);
            }
        }
        removed
    }

    /// Evicts transactions confirmed by `block` and, recursively, pool
    /// transactions that spent the same outpoints as the block did.
    pub fn remove_for_block(&mut self, block: &Block) -> usize {
        let mut removed = 0;
        for tx in &block.transactions {
            let txid = calculate_tx_id(tx);
            if self.remove(&txid).is_some() {
                removed += 1;
            }
            for input in &tx.inputs {
                if let Some(conflict) = self.spent_by.get(&input.prevout).copied() {
                    removed += self.remove_recursive(&conflict).len();
                }
            }
        }
        debug!(removed, remaining = self.entries.len(), "removed transactions for block");
        removed
    }
}

/// Read-only view of the confirmed coins with pool outputs layered on top.
///
/// Pool coins are reported at `pool_height`, the height of the next block.
pub struct MempoolCoinView<'a> {
    inner: &'a dyn CoinView,
    pool: &'a TxMempool,
    pool_height: Height,
}

impl<'a> MempoolCoinView<'a> {
    pub fn new(inner: &'a dyn CoinView, pool: &'a TxMempool, pool_height: Height) -> Self {
        Self { inner, pool, pool_height }
    }

    /// Batched lookup; confirmed coins win, pool outputs fill the gaps.
    pub fn fetch_coins(&self, outpoints: &[OutPoint]) -> Result<FetchCoinsResponse> {
        let confirmed = self.inner.fetch_coins(outpoints)?;
        let mut response = FetchCoinsResponse::new();
        for output in confirmed.into_outputs() {
            let coin = output.coin.or_else(|| {
                self.pool.output(&output.outpoint).map(|pooled| Coin {
                    value: pooled.value,
                    script_pubkey: pooled.script_pubkey.clone(),
                    height: self.pool_height,
                    is_coinbase: false,
                    is_coinstake: false,
                })
            });
            response.push(output.outpoint, coin);
        }
        Ok(response)
    }

    /// Whether `txid` is pooled or has unspent confirmed outputs.
    pub fn have_transaction(&self, txid: &Hash) -> Result<bool> {
        Ok(self.pool.contains(txid) || self.inner.have_transaction(txid)?)
    }
}
