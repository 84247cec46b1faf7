//! # Consensus-Engine
//!
//! Consensus validation and soft-fork activation for a full node.
//!
//! The crate decides whether a block or a loose transaction is acceptable,
//! and which soft-fork deployments are in force at a given height.
//!
//! ## Architecture
//!
//! - Threshold cache: BIP9 state of every deployment, memoised per window
//! - Node deployments: enforcement flags for a header
//! - Rule chain: ordered header, integrity, partial and full validation rules
//! - Coin view: the unspent output set the rules read and stage changes for
//! - Mempool: admission rule chain over the coin view plus pooled outputs
//!
//! Storage, transport and the script interpreter are collaborators reached
//! through the `CoinView`, `ChainIndexer` and `ScriptVerifier` traits.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use consensus_engine::block::{build_coinbase, compute_merkle_root};
//! use consensus_engine::coinview::InMemoryCoinView;
//! use consensus_engine::network::{ConsensusParams, ConsensusSettings};
//! use consensus_engine::script::AcceptAllScripts;
//! use consensus_engine::transaction::calculate_tx_id;
//! use consensus_engine::types::*;
//! use consensus_engine::ConsensusEngine;
//!
//! let engine = ConsensusEngine::new(
//!     ConsensusParams::regtest(),
//!     ConsensusSettings::default(),
//!     Arc::new(InMemoryCoinView::new()),
//!     Arc::new(AcceptAllScripts),
//! )
//! .unwrap();
//!
//! let coinbase = build_coinbase(0, 50 * 100_000_000, vec![0x51]);
//! let (merkle_root, _) = compute_merkle_root(&[calculate_tx_id(&coinbase)]);
//! let genesis = Block {
//!     header: BlockHeader {
//!         version: 4,
//!         prev_block_hash: [0; 32],
//!         merkle_root,
//!         timestamp: 1_600_000_000,
//!         bits: 0x207f_ffff,
//!         nonce: 0,
//!     },
//!     transactions: vec![coinbase],
//! };
//!
//! let header = engine.connect_block(&genesis, 1_600_000_000).unwrap();
//! assert_eq!(header.height(), 0);
//! ```

pub mod block;
pub mod chain;
pub mod coinview;
pub mod constants;
pub mod context;
pub mod deployments;
pub mod economic;
pub mod error;
pub mod mempool;
pub mod network;
pub mod rules;
pub mod script;
pub mod threshold;
pub mod transaction;
pub mod types;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::ChainValidator;
use crate::chain::{ChainIndexer, ChainTip, ChainedHeader};
use crate::coinview::{new_chain_state_lock, CoinView};
use crate::deployments::{DeploymentFlags, NodeDeployments};
use crate::mempool::{MempoolValidationState, MempoolValidator};
use crate::network::{ConsensusParams, ConsensusSettings};
use crate::rules::ConsensusRuleEngine;
use crate::script::ScriptVerifier;
use crate::threshold::{DeploymentStatistics, ThresholdState};

// Re-export commonly used types
pub use constants::*;
pub use error::{ConsensusError, ErrorClass, Result};
pub use types::*;

/// One node's consensus engine: deployments, block connection and the
/// mempool, sharing one coin view, one chain tip and one chain-state lock.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use consensus_engine::coinview::InMemoryCoinView;
/// use consensus_engine::network::{ConsensusParams, ConsensusSettings};
/// use consensus_engine::script::AcceptAllScripts;
/// use consensus_engine::ConsensusEngine;
///
/// let engine = ConsensusEngine::new(
///     ConsensusParams::regtest(),
///     ConsensusSettings::default(),
///     Arc::new(InMemoryCoinView::new()),
///     Arc::new(AcceptAllScripts),
/// )
/// .unwrap();
///
/// // Nothing is connected yet.
/// assert!(engine.tip().is_none());
/// assert!(engine.flags_at_tip().is_err());
/// ```
pub struct ConsensusEngine {
    params: Arc<ConsensusParams>,
    settings: ConsensusSettings,
    deployments: Arc<NodeDeployments>,
    chain: Arc<ChainTip>,
    best_header: RwLock<Option<Arc<ChainedHeader>>>,
    validator: ChainValidator,
    mempool: MempoolValidator,
}

impl ConsensusEngine {
    /// Wires the engine for one network. Fails on inconsistent parameters.
    pub fn new(
        params: ConsensusParams,
        settings: ConsensusSettings,
        coin_view: Arc<dyn CoinView>,
        script_verifier: Arc<dyn ScriptVerifier>,
    ) -> Result<Self> {
        let params = Arc::new(params);
        let deployments = Arc::new(NodeDeployments::new(Arc::clone(&params))?);
        let chain = Arc::new(ChainTip::default());
        let chain_lock = new_chain_state_lock();

        let engine = ConsensusRuleEngine::for_network(Arc::clone(&params), &settings, Arc::clone(&script_verifier));
        let validator = ChainValidator::new(
            Arc::clone(&deployments),
            &settings,
            engine,
            Arc::clone(&chain),
            Arc::clone(&coin_view),
            Arc::clone(&chain_lock),
        );
        let mempool = MempoolValidator::new(
            Arc::clone(&deployments),
            settings.clone(),
            chain.clone(),
            coin_view,
            chain_lock,
            script_verifier,
        );

        Ok(Self {
            params,
            settings,
            deployments,
            chain,
            best_header: RwLock::new(None),
            validator,
            mempool,
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    pub fn deployments(&self) -> &Arc<NodeDeployments> {
        &self.deployments
    }

    pub fn validator(&self) -> &ChainValidator {
        &self.validator
    }

    pub fn mempool(&self) -> &MempoolValidator {
        &self.mempool
    }

    pub fn tip(&self) -> Option<Arc<ChainedHeader>> {
        self.chain.tip()
    }

    /// Records the tip of the best known header chain, used for assume-valid.
    pub fn set_best_header(&self, header: Option<Arc<ChainedHeader>>) {
        *self.best_header.write() = header;
    }

    /// Validates `block` on top of the current tip and commits it.
    ///
    /// The first block connected must be a genesis block. On success the
    /// mempool drops what the block confirmed or conflicted with.
    pub fn connect_block(&self, block: &Block, time: u64) -> Result<Arc<ChainedHeader>> {
        let header = match self.chain.tip() {
            Some(tip) => {
                if block.header.prev_block_hash != tip.hash() {
                    return Err(ConsensusError::InvalidArgument("block does not build on the tip"));
                }
                tip.extend(block.header.clone())
            }
            None => ChainedHeader::genesis(block.header.clone()),
        };

        let best_header = self.best_header.read().clone();
        self.validator.connect_block(block, &header, time, best_header.as_ref())?;
        self.mempool.remove_for_block(block);
        Ok(header)
    }

    /// Disconnects the tip block and returns its header.
    ///
    /// Pool transactions left without inputs, or spending rewards that are
    /// immature below the new tip, are evicted with their descendants.
    pub fn disconnect_tip(&self) -> Result<Arc<ChainedHeader>> {
        let tip = self
            .chain
            .tip()
            .ok_or(ConsensusError::InvalidArgument("chain has no tip"))?;
        self.validator.disconnect_block(&tip)?;
        self.mempool.remove_for_reorg()?;
        Ok(tip)
    }

    /// Runs mempool admission for `tx` at validation time `time`.
    pub fn accept_transaction(
        &self,
        tx: &Transaction,
        time: u64,
        state: &mut MempoolValidationState,
    ) -> Result<Hash> {
        self.mempool.accept_to_memory_pool(tx, time, state)
    }

    /// Flags in force for the current tip.
    pub fn flags_at_tip(&self) -> Result<DeploymentFlags> {
        self.deployments.get_flags_at_tip(self.chain.as_ref())
    }

    /// State of `deployment` for the block after the tip.
    pub fn deployment_state(&self, deployment: usize) -> Result<ThresholdState> {
        let tip = self.chain.tip();
        self.deployments.threshold_cache().get_state(tip.as_ref(), deployment)
    }

    /// Signalling progress of `deployment` in the tip's window.
    pub fn deployment_statistics(&self, deployment: usize) -> Result<DeploymentStatistics> {
        let tip = self.chain.tip();
        self.deployments.threshold_cache().statistics(tip.as_ref(), deployment)
    }

    /// Version a block mined on the tip should carry.
    pub fn block_version(&self) -> i32 {
        let tip = self.chain.tip();
        self.deployments.threshold_cache().compute_block_version(tip.as_ref())
    }
}
