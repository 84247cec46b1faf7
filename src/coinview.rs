//! Coin view: the unspent transaction output set
//!
//! `CoinView` is the storage collaborator's surface. Rules never write to it
//! directly; they stage changes in an `UnspentOutputSet` that the caller
//! commits once the whole rule chain has passed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ConsensusError, Result};
use crate::transaction::{calculate_tx_id, is_coinbase, is_coinstake};
use crate::types::*;

/// Node-wide exclusion between chain-tip mutation (write) and validation
/// reads of the coin view and mempool (read).
pub type ChainStateLock = Arc<RwLock<()>>;

pub fn new_chain_state_lock() -> ChainStateLock {
    Arc::new(RwLock::new(()))
}

/// FetchCoinsResponse: one entry per distinct requested outpoint, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchCoinsResponse {
    outputs: Vec<UnspentOutput>,
    index: HashMap<OutPoint, usize>,
}

impl FetchCoinsResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the lookup result for `outpoint`; repeated outpoints keep
    /// their first position and value.
    pub fn push(&mut self, outpoint: OutPoint, coin: Option<Coin>) {
        if self.index.contains_key(&outpoint) {
            return;
        }
        self.index.insert(outpoint, self.outputs.len());
        self.outputs.push(UnspentOutput::new(outpoint, coin));
    }

    /// The entry for `outpoint`; `None` only if it was never requested.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&UnspentOutput> {
        self.index.get(outpoint).map(|&i| &self.outputs[i])
    }

    /// The unspent coin at `outpoint`, if any.
    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.get(outpoint).and_then(|output| output.coin.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentOutput> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn into_outputs(self) -> Vec<UnspentOutput> {
        self.outputs
    }
}

/// Undo information for one connected block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewindData {
    pub previous_tip: Option<Hash>,
    /// Coins that existed before the block and were spent by it.
    pub spent: Vec<UnspentOutput>,
    /// Outpoints created by the block.
    pub created: Vec<OutPoint>,
}

/// A batch of coin mutations moving the view from `old_tip` to `new_tip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinViewChanges {
    pub old_tip: Option<Hash>,
    pub new_tip: Hash,
    pub height: Height,
    /// Final state of every touched outpoint, ordered by outpoint.
    pub outputs: Vec<UnspentOutput>,
    pub rewind: RewindData,
}

/// Storage collaborator for the unspent output set.
pub trait CoinView: Send + Sync {
    /// Hash of the block the view is synced to.
    fn tip_hash(&self) -> Result<Option<Hash>>;

    /// Batched lookup; the response holds an entry for every requested outpoint.
    fn fetch_coins(&self, outpoints: &[OutPoint]) -> Result<FetchCoinsResponse>;

    /// Whether any unspent output of `txid` exists.
    fn have_transaction(&self, txid: &Hash) -> Result<bool>;

    /// Applies a batch of changes; fails if `old_tip` is not the current tip.
    fn save_changes(&self, changes: CoinViewChanges) -> Result<()>;

    /// Undoes the last saved batch and returns the restored tip.
    fn rewind(&self) -> Result<Option<Hash>>;

    fn have_coins(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.fetch_coins(&[*outpoint])?.coin(outpoint).is_some())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    coins: BTreeMap<OutPoint, Coin>,
    tip: Option<Hash>,
    rewind: Vec<RewindData>,
}

/// In-memory coin view used by tests and light deployments.
#[derive(Debug, Default)]
pub struct InMemoryCoinView {
    state: RwLock<MemoryState>,
}

impl InMemoryCoinView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the view with `coins` at `tip` without rewind data.
    pub fn with_coins(tip: Option<Hash>, coins: impl IntoIterator<Item = (OutPoint, Coin)>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                coins: coins.into_iter().collect(),
                tip,
                rewind: Vec::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rewind_depth(&self) -> usize {
        self.state.read().rewind.len()
    }
}

impl CoinView for InMemoryCoinView {
    fn tip_hash(&self) -> Result<Option<Hash>> {
        Ok(self.state.read().tip)
    }

    fn fetch_coins(&self, outpoints: &[OutPoint]) -> Result<FetchCoinsResponse> {
        let state = self.state.read();
        let mut response = FetchCoinsResponse::new();
        for outpoint in outpoints {
            response.push(*outpoint, state.coins.get(outpoint).cloned());
        }
        Ok(response)
    }

    fn have_transaction(&self, txid: &Hash) -> Result<bool> {
        let state = self.state.read();
        let first = OutPoint::new(*txid, 0);
        let found = state
            .coins
            .range(first..)
            .next()
            .map(|(outpoint, _)| &outpoint.hash == txid)
            .unwrap_or(false);
        Ok(found)
    }

    fn save_changes(&self, changes: CoinViewChanges) -> Result<()> {
        let mut state = self.state.write();
        if state.tip != changes.old_tip {
            return Err(ConsensusError::CoinView(format!(
                "tip mismatch: expected {:02x?}, found {:02x?}",
                changes.old_tip, state.tip
            )));
        }
        for output in changes.outputs {
            match output.coin {
                Some(coin) => {
                    state.coins.insert(output.outpoint, coin);
                }
                None => {
                    state.coins.remove(&output.outpoint);
                }
            }
        }
        state.rewind.push(changes.rewind);
        state.tip = Some(changes.new_tip);
        debug!(height = changes.height, coins = state.coins.len(), "saved coin view changes");
        Ok(())
    }

    fn rewind(&self) -> Result<Option<Hash>> {
        let mut state = self.state.write();
        let rewind = state
            .rewind
            .pop()
            .ok_or_else(|| ConsensusError::CoinView("nothing to rewind".to_string()))?;
        for outpoint in &rewind.created {
            state.coins.remove(outpoint);
        }
        for output in rewind.spent {
            if let Some(coin) = output.coin {
                state.coins.insert(output.outpoint, coin);
            }
        }
        state.tip = rewind.previous_tip;
        Ok(state.tip)
    }
}

/// Staging set for one block: loaded coins plus the block's own spends
/// and creations. Nothing reaches the coin view until `into_changes`.
#[derive(Debug, Clone, Default)]
pub struct UnspentOutputSet {
    outputs: BTreeMap<OutPoint, UnspentOutput>,
    dirty: BTreeSet<OutPoint>,
    created: BTreeSet<OutPoint>,
    spent: Vec<UnspentOutput>,
}

impl UnspentOutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a lookup result. Already staged outpoints are left untouched.
    pub fn set_coins(&mut self, response: FetchCoinsResponse) {
        for output in response.into_outputs() {
            self.outputs.entry(output.outpoint).or_insert(output);
        }
    }

    pub fn access_coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.outputs.get(outpoint).and_then(|output| output.coin.as_ref())
    }

    pub fn have_inputs(&self, tx: &Transaction) -> bool {
        tx.inputs.iter().all(|input| self.access_coin(&input.prevout).is_some())
    }

    /// Marks `outpoint` spent and returns its coin.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Result<Coin> {
        let output = self
            .outputs
            .get_mut(outpoint)
            .ok_or(ConsensusError::BadTransactionMissingInput)?;
        let coin = output.coin.take().ok_or(ConsensusError::BadTransactionMissingInput)?;
        self.dirty.insert(*outpoint);
        if !self.created.contains(outpoint) {
            self.spent.push(UnspentOutput::new(*outpoint, Some(coin.clone())));
        }
        Ok(coin)
    }

    /// Creates the outputs of `tx` at `height`.
    pub fn add_transaction(&mut self, tx: &Transaction, height: Height) {
        let txid = calculate_tx_id(tx);
        let coinbase = is_coinbase(tx);
        let coinstake = is_coinstake(tx);
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.is_empty() {
                continue;
            }
            let outpoint = OutPoint::new(txid, index as u32);
            let coin = Coin {
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
                height,
                is_coinbase: coinbase,
                is_coinstake: coinstake,
            };
            self.outputs.insert(outpoint, UnspentOutput::new(outpoint, Some(coin)));
            self.dirty.insert(outpoint);
            self.created.insert(outpoint);
        }
    }

    /// Spends the inputs of `tx` (unless coinbase) and creates its outputs.
    /// Returns the total value spent.
    pub fn update(&mut self, tx: &Transaction, height: Height) -> Result<Amount> {
        let mut value_in = 0;
        if !is_coinbase(tx) {
            for input in &tx.inputs {
                value_in += self.spend(&input.prevout)?.value;
            }
        }
        self.add_transaction(tx, height);
        Ok(value_in)
    }

    /// Converts staged mutations into a batch for the coin view.
    pub fn into_changes(self, old_tip: Option<Hash>, new_tip: Hash, height: Height) -> CoinViewChanges {
        let mut outputs = self.outputs;
        let changed = self
            .dirty
            .iter()
            .filter_map(|outpoint| outputs.remove(outpoint))
            .collect();
        CoinViewChanges {
            old_tip,
            new_tip,
            height,
            outputs: changed,
            rewind: RewindData {
                previous_tip: old_tip,
                spent: self.spent,
                created: self.created.into_iter().collect(),
            },
        }
    }
}
