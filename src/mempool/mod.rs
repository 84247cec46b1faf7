//! Mempool admission
//!
//! AcceptToMemoryPool: 𝒯𝒳 → {accepted, rejected}
//!
//! A transaction is checked against the confirmed coin view overlaid with the
//! pool, under the chain-state read lock so no block commit can interleave.
//! Insertion re-checks for duplicates and conflicts under the pool write
//! lock, so two concurrent submissions of one transaction admit it once.

pub mod pool;
pub mod rules;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::chain::ChainIndexer;
use crate::coinview::{ChainStateLock, CoinView, FetchCoinsResponse};
use crate::deployments::NodeDeployments;
use crate::error::{ConsensusError, Result};
use crate::network::{ConsensusParams, ConsensusSettings};
use crate::rules::ConsensusFlavor;
use crate::script::ScriptVerifier;
use crate::transaction::{calculate_tx_id, LockPoints};
use crate::types::*;

pub use self::pool::{MempoolCoinView, MempoolEntry, TxMempool};
pub use self::rules::{
    default_mempool_rules, CheckAllInputsMempoolRule, CheckCoinViewMempoolRule, CheckConflictsMempoolRule,
    CheckFinalTransactionMempoolRule, CheckTransactionMempoolRule, CreateMempoolEntryMempoolRule, MempoolRule,
    MempoolValidationContext, MempoolValidationState,
};

pub struct MempoolValidator {
    params: Arc<ConsensusParams>,
    settings: ConsensusSettings,
    deployments: Arc<NodeDeployments>,
    chain: Arc<dyn ChainIndexer>,
    coin_view: Arc<dyn CoinView>,
    chain_lock: ChainStateLock,
    pool: RwLock<TxMempool>,
    flavor: ConsensusFlavor,
    rules: Vec<Box<dyn MempoolRule>>,
}

impl MempoolValidator {
    pub fn new(
        deployments: Arc<NodeDeployments>,
        settings: ConsensusSettings,
        chain: Arc<dyn ChainIndexer>,
        coin_view: Arc<dyn CoinView>,
        chain_lock: ChainStateLock,
        script_verifier: Arc<dyn ScriptVerifier>,
    ) -> Self {
        let params = Arc::clone(deployments.params());
        let flavor = ConsensusFlavor::from(params.kind);
        let rules = default_mempool_rules(flavor, script_verifier);
        Self {
            pool: RwLock::new(TxMempool::new(settings.max_mempool_transactions)),
            flavor,
            params,
            settings,
            deployments,
            chain,
            coin_view,
            chain_lock,
            rules,
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn pool(&self) -> &RwLock<TxMempool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.pool.read().contains(txid)
    }

    /// Runs the admission chain on `tx` at validation time `time` and
    /// inserts it. The failure, if any, is also recorded in `state`.
    pub fn accept_to_memory_pool(
        &self,
        tx: &Transaction,
        time: u64,
        state: &mut MempoolValidationState,
    ) -> Result<Hash> {
        let result = self.accept(tx, time, state);
        if let Err(err) = &result {
            debug!(code = err.code(), missing_inputs = state.missing_inputs, "transaction rejected: {}", err);
            state.error = Some(err.clone());
        }
        result
    }

    fn accept(&self, tx: &Transaction, time: u64, state: &mut MempoolValidationState) -> Result<Hash> {
        let _chain = self.chain_lock.read();
        let tip = self
            .chain
            .tip()
            .ok_or(ConsensusError::InvalidArgument("chain has no tip"))?;
        let flags = self.deployments.get_flags(&tip);
        let txid = calculate_tx_id(tx);

        let entry = {
            let pool = self.pool.read();
            let mut context = MempoolValidationContext {
                tx,
                txid,
                time,
                view: MempoolCoinView::new(self.coin_view.as_ref(), &pool, tip.height() + 1),
                tip,
                flags,
                params: &self.params,
                settings: &self.settings,
                pool: &pool,
                state,
                coins: FetchCoinsResponse::new(),
                lock_points: LockPoints::unconstrained(),
                entry: None,
            };
            for rule in &self.rules {
                rule.check(&mut context)?;
            }
            context
                .entry
                .take()
                .ok_or(ConsensusError::InvalidArgument("admission chain built no entry"))?
        };

        let fee = entry.fee;
        self.pool.write().add_unchecked(entry)?;
        debug!(txid = ?txid, fee, "accepted transaction to mempool");
        Ok(txid)
    }

    /// Evicts what `block` confirmed or invalidated. Call after connecting it.
    pub fn remove_for_block(&self, block: &Block) -> usize {
        self.pool.write().remove_for_block(block)
    }

    /// Re-checks the pool against the current tip after a disconnect.
    ///
    /// Entries whose inputs no longer resolve through the confirmed view or
    /// the pool, or whose reward inputs are immature at the new next height,
    /// are removed together with their descendants.
    pub fn remove_for_reorg(&self) -> Result<usize> {
        let _chain = self.chain_lock.read();
        let mut pool = self.pool.write();
        let tip = match self.chain.tip() {
            Some(tip) => tip,
            None => {
                let removed = pool.len();
                *pool = TxMempool::new(self.settings.max_mempool_transactions);
                return Ok(removed);
            }
        };
        let next_height = tip.height() + 1;

        let mut stale = Vec::new();
        {
            let view = MempoolCoinView::new(self.coin_view.as_ref(), &pool, next_height);
            for entry in pool.entries() {
                let outpoints: Vec<OutPoint> = entry.tx.inputs.iter().map(|input| input.prevout).collect();
                let coins = view.fetch_coins(&outpoints)?;
                let valid = outpoints.iter().all(|outpoint| match coins.coin(outpoint) {
                    Some(coin) => self.flavor.check_maturity(&self.params, coin, next_height).is_ok(),
                    None => false,
                });
                if !valid {
                    stale.push(entry.txid);
                }
            }
        }

        let removed: usize = stale.iter().map(|txid| pool.remove_recursive(txid).len()).sum();
        debug!(removed, remaining = pool.len(), height = tip.height(), "reconciled mempool after disconnect");
        Ok(removed)
    }
}
