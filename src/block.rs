//! Block hashing, merkle commitment and block connection

use std::sync::Arc;

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::chain::{AssumeValid, ChainTip, ChainedHeader, Checkpoints};
use crate::coinview::{ChainStateLock, CoinView};
use crate::context::RuleContext;
use crate::deployments::NodeDeployments;
use crate::error::{ConsensusError, Result};
use crate::network::{ConsensusParams, ConsensusSettings};
use crate::rules::ConsensusRuleEngine;
use crate::transaction::transaction_size;
use crate::types::*;

/// The 80-byte header serialization.
pub fn serialize_header(header: &BlockHeader) -> [u8; 80] {
    let mut data = [0u8; 80];
    data[0..4].copy_from_slice(&header.version.to_le_bytes());
    data[4..36].copy_from_slice(&header.prev_block_hash);
    data[36..68].copy_from_slice(&header.merkle_root);
    data[68..72].copy_from_slice(&header.timestamp.to_le_bytes());
    data[72..76].copy_from_slice(&header.bits.to_le_bytes());
    data[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    data
}

/// Block hash: SHA256(SHA256(header))
pub fn hash_header(header: &BlockHeader) -> Hash {
    let first = Sha256::digest(serialize_header(header));
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// ComputeMerkleRoot: [Hash] → Hash × {mutated}
///
/// Pairs are hashed with SHA256d level by level, duplicating the last hash
/// of an odd level. `mutated` reports two identical adjacent hashes, which
/// makes the tree ambiguous. An empty list yields the zero hash.
pub fn compute_merkle_root(hashes: &[Hash]) -> (Hash, bool) {
    if hashes.is_empty() {
        return ([0; 32], false);
    }

    let mut level = hashes.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        for pair in level.chunks(2) {
            if pair.len() == 2 && pair[0] == pair[1] {
                mutated = true;
            }
        }
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut engine = sha256d::Hash::engine();
                engine.input(&pair[0]);
                engine.input(&pair[1]);
                sha256d::Hash::from_engine(engine).into_inner()
            })
            .collect();
    }
    (level[0], mutated)
}

/// Serialized block size: header, transaction count and transactions.
pub fn block_size(block: &Block) -> usize {
    let count = block.transactions.len();
    let count_len = match count {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        _ => 5,
    };
    80 + count_len + block.transactions.iter().map(transaction_size).sum::<usize>()
}

/// BIP34 height prefix: the height as a minimal script number push.
/// Heights 0 to 16 use the small-integer opcodes.
pub fn coinbase_height_script(height: Height) -> Vec<u8> {
    match height {
        0 => vec![0x00],
        1..=16 => vec![0x50 + height as u8],
        _ => {
            let mut number = Vec::new();
            let mut value = height;
            while value > 0 {
                number.push((value & 0xff) as u8);
                value >>= 8;
            }
            // Script numbers are signed; keep the top bit clear.
            if number.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
                number.push(0x00);
            }
            let mut script = Vec::with_capacity(number.len() + 1);
            script.push(number.len() as u8);
            script.extend(number);
            script
        }
    }
}

/// A coinbase for `height` paying `value` to `script_pubkey`.
///
/// The script signature carries the BIP34 height followed by an extra-nonce
/// byte so it always meets the minimum coinbase script size.
pub fn build_coinbase(height: Height, value: Amount, script_pubkey: ByteString) -> Transaction {
    let mut script_sig = coinbase_height_script(height);
    script_sig.push(0x00);
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        outputs: vec![TransactionOutput { value, script_pubkey }],
        lock_time: 0,
    }
}

/// Connects blocks to the coin view through the consensus rule chain.
///
/// One connect runs at a time. The staged changes and the new tip are
/// committed under the chain-state write lock, so mempool checks never see a
/// half-applied block.
pub struct ChainValidator {
    deployments: Arc<NodeDeployments>,
    chain: Arc<ChainTip>,
    engine: ConsensusRuleEngine,
    checkpoints: Checkpoints,
    assume_valid: AssumeValid,
    coin_view: Arc<dyn CoinView>,
    chain_lock: ChainStateLock,
    connect_lock: Mutex<()>,
}

impl ChainValidator {
    pub fn new(
        deployments: Arc<NodeDeployments>,
        settings: &ConsensusSettings,
        engine: ConsensusRuleEngine,
        chain: Arc<ChainTip>,
        coin_view: Arc<dyn CoinView>,
        chain_lock: ChainStateLock,
    ) -> Self {
        let params: &ConsensusParams = deployments.params();
        let checkpoints = Checkpoints::new(params.checkpoints.clone(), settings.use_checkpoints);
        Self {
            deployments,
            chain,
            engine,
            checkpoints,
            assume_valid: AssumeValid::new(settings.assume_valid),
            coin_view,
            chain_lock,
            connect_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &ConsensusRuleEngine {
        &self.engine
    }

    pub fn coin_view(&self) -> &Arc<dyn CoinView> {
        &self.coin_view
    }

    /// Whether scripts of the block at `header` may go unverified.
    pub fn skip_validation(&self, header: &ChainedHeader, best_header: Option<&Arc<ChainedHeader>>) -> bool {
        self.checkpoints.is_below_last_checkpoint(header.height())
            || self.assume_valid.covers(header, best_header)
    }

    /// ConnectBlock: ℬ × 𝒰𝒮 → {valid, invalid} × 𝒰𝒮
    ///
    /// For block b at `header` on top of the coin view tip:
    /// 1. Compute the deployment flags for the header
    /// 2. Decide whether script checks may be skipped
    /// 3. Run every rule category in order against a fresh context
    /// 4. Commit the staged coin changes, or leave the view untouched on error
    ///
    /// `time` is the validation time in seconds; `best_header` is the tip of
    /// the best known header chain, used for assume-valid.
    pub fn connect_block(
        &self,
        block: &Block,
        header: &Arc<ChainedHeader>,
        time: u64,
        best_header: Option<&Arc<ChainedHeader>>,
    ) -> Result<()> {
        let _connect = self.connect_lock.lock();

        if header.hash() != hash_header(&block.header) {
            return Err(ConsensusError::InvalidArgument("block does not match its chained header"));
        }
        let expected_tip = header.previous().map(|prev| prev.hash());
        if self.coin_view.tip_hash()? != expected_tip {
            return Err(ConsensusError::InvalidArgument("block does not extend the coin view tip"));
        }

        let height = header.height();
        let flags = self.deployments.get_flags(header);
        let skip_validation = self.skip_validation(header, best_header);
        debug!(height, skip_validation, "validating block");

        let mut context = RuleContext::new(
            block,
            Arc::clone(header),
            time,
            flags,
            skip_validation,
            self.coin_view.as_ref(),
        );
        self.engine.validate(&mut context)?;
        let fees = context.total_fees;
        let changes = context.into_changes();

        {
            let _chain = self.chain_lock.write();
            self.coin_view.save_changes(changes)?;
            self.chain.set_tip(Some(Arc::clone(header)));
        }

        info!(
            height,
            transactions = block.transactions.len(),
            fees,
            "connected block"
        );
        Ok(())
    }

    /// Rewinds the coin view past `header`, which must be its tip, and
    /// drops deployment memo entries above the new tip.
    pub fn disconnect_block(&self, header: &Arc<ChainedHeader>) -> Result<Option<Hash>> {
        let _connect = self.connect_lock.lock();

        if self.coin_view.tip_hash()? != Some(header.hash()) {
            return Err(ConsensusError::InvalidArgument("header is not the coin view tip"));
        }

        let restored = {
            let _chain = self.chain_lock.write();
            let restored = self.coin_view.rewind()?;
            self.chain.set_tip(header.previous().cloned());
            restored
        };
        self.deployments
            .threshold_cache()
            .evict_above(header.height().saturating_sub(1));

        info!(height = header.height(), "disconnected block");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::chain::ChainIndexer;
    use crate::coinview::{new_chain_state_lock, InMemoryCoinView};
    use crate::constants::COIN;
    use crate::rules::test_utils::*;
    use crate::script::{AcceptAllScripts, ScriptEquality, ScriptVerifier};
    use crate::transaction::calculate_tx_id;

    struct Node {
        validator: ChainValidator,
        view: Arc<InMemoryCoinView>,
        chain: Arc<ChainTip>,
    }

    fn node(params: ConsensusParams, settings: ConsensusSettings, verifier: Arc<dyn ScriptVerifier>) -> Node {
        let params = Arc::new(params);
        let deployments = Arc::new(NodeDeployments::new(Arc::clone(&params)).unwrap());
        let engine = ConsensusRuleEngine::for_network(Arc::clone(&params), &settings, verifier);
        let view = Arc::new(InMemoryCoinView::new());
        let chain = Arc::new(ChainTip::default());
        let validator = ChainValidator::new(
            deployments,
            &settings,
            engine,
            Arc::clone(&chain),
            view.clone(),
            new_chain_state_lock(),
        );
        Node { validator, view, chain }
    }

    fn mine(node: &Node, block: &Block, header: &Arc<ChainedHeader>) -> Result<()> {
        node.validator.connect_block(block, header, u64::MAX / 2, None)
    }

    #[test]
    fn test_hash_header_known_vector() {
        // Bitcoin genesis block header.
        let mut merkle_root = [0u8; 32];
        let root_be = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        for (i, byte) in merkle_root.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&root_be[62 - 2 * i..64 - 2 * i], 16).unwrap();
        }
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root,
            timestamp: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        };
        let mut hash = hash_header(&header);
        hash.reverse();
        assert_eq!(hash[..4], [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(hash[4..8], [0x00, 0x19, 0xd6, 0x68]);
    }

    #[test]
    fn test_merkle_root_single_and_odd() {
        let a = [1u8; 32];
        assert_eq!(compute_merkle_root(&[a]), (a, false));

        let (odd, mutated) = compute_merkle_root(&[a, [2; 32], [3; 32]]);
        assert!(!mutated);
        let (even, _) = compute_merkle_root(&[a, [2; 32], [3; 32], [3; 32]]);
        assert_eq!(odd, even);
    }

    #[test]
    fn test_coinbase_height_script() {
        assert_eq!(coinbase_height_script(0), vec![0x00]);
        assert_eq!(coinbase_height_script(1), vec![0x51]);
        assert_eq!(coinbase_height_script(16), vec![0x60]);
        assert_eq!(coinbase_height_script(17), vec![0x01, 0x11]);
        assert_eq!(coinbase_height_script(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(coinbase_height_script(500_000), vec![0x03, 0x20, 0xa1, 0x07]);
    }

    #[test]
    fn test_connect_and_disconnect() {
        let node = node(ConsensusParams::regtest(), ConsensusSettings::default(), Arc::new(AcceptAllScripts));
        let (genesis, genesis_header) = genesis_block(50 * COIN);
        mine(&node, &genesis, &genesis_header).unwrap();

        let (block, header) = block_on(&genesis_header, vec![build_coinbase(1, 50 * COIN, vec![0x51])]);
        mine(&node, &block, &header).unwrap();
        assert_eq!(node.view.tip_hash().unwrap(), Some(header.hash()));
        assert_eq!(node.chain.tip().unwrap().hash(), header.hash());
        assert_eq!(node.view.len(), 2);

        assert_eq!(node.validator.disconnect_block(&header).unwrap(), Some(genesis_header.hash()));
        assert_eq!(node.chain.tip().unwrap().hash(), genesis_header.hash());
        assert_eq!(node.view.len(), 1);
        assert!(node.validator.disconnect_block(&header).is_err());
    }

    #[test]
    fn test_failed_block_leaves_view_untouched() {
        let node = node(ConsensusParams::regtest(), ConsensusSettings::default(), Arc::new(AcceptAllScripts));
        let (genesis, genesis_header) = genesis_block(50 * COIN);
        mine(&node, &genesis, &genesis_header).unwrap();

        let (block, header) = block_on(&genesis_header, vec![build_coinbase(1, 50 * COIN + 1, vec![0x51])]);
        assert!(matches!(mine(&node, &block, &header), Err(ConsensusError::BadCoinbaseAmount { .. })));
        assert_eq!(node.view.tip_hash().unwrap(), Some(genesis_header.hash()));
        assert_eq!(node.view.len(), 1);
    }

    #[test]
    fn test_connect_requires_parent_at_tip() {
        let node = node(ConsensusParams::regtest(), ConsensusSettings::default(), Arc::new(AcceptAllScripts));
        let (_, genesis_header) = genesis_block(50 * COIN);
        let (block, header) = block_on(&genesis_header, vec![build_coinbase(1, 0, vec![0x51])]);
        assert_eq!(
            mine(&node, &block, &header),
            Err(ConsensusError::InvalidArgument("block does not extend the coin view tip"))
        );
    }

    #[test]
    fn test_checkpoint_skips_scripts() {
        let (genesis, genesis_header) = genesis_block(50 * COIN);
        let funding = OutPoint::new(calculate_tx_id(&genesis.transactions[0]), 0);
        let mut bad_spend = spend(funding, 50 * COIN);
        bad_spend.inputs[0].script_sig = vec![0x52];

        let mut params = ConsensusParams::regtest();
        params.coinbase_maturity = 1;
        let (block, header) = block_on(&genesis_header, vec![build_coinbase(1, 0, vec![0x51]), bad_spend]);

        let strict = node(params.clone(), ConsensusSettings::default(), Arc::new(ScriptEquality));
        mine(&strict, &genesis, &genesis_header).unwrap();
        assert!(matches!(
            mine(&strict, &block, &header),
            Err(ConsensusError::BadTransactionScriptError { input: 0, .. })
        ));

        let mut checkpoints = BTreeMap::new();
        checkpoints.insert(1, header.hash());
        params.checkpoints = checkpoints;
        let trusting = node(params, ConsensusSettings::default(), Arc::new(ScriptEquality));
        mine(&trusting, &genesis, &genesis_header).unwrap();
        assert_eq!(mine(&trusting, &block, &header), Ok(()));
    }
}
