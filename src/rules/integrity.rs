//! Block integrity rules: the body matches its header

use crate::block::compute_merkle_root;
use crate::context::RuleContext;
use crate::error::{ConsensusError, Result};
use crate::rules::{ConsensusRule, RuleCategory};
use crate::transaction::{calculate_tx_id, is_coinbase};
use crate::types::Hash;

/// The header's merkle root commits to the block's transactions.
///
/// A tree made ambiguous by a duplicated trailing pair (CVE-2012-2459) is
/// rejected even if its root matches.
pub struct BlockMerkleRootRule;

impl ConsensusRule for BlockMerkleRootRule {
    fn name(&self) -> &'static str {
        "BlockMerkleRootRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Integrity
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let txids: Vec<Hash> = context.block.transactions.iter().map(calculate_tx_id).collect();
        let (root, mutated) = compute_merkle_root(&txids);
        if mutated || root != context.block.header.merkle_root {
            return Err(ConsensusError::BadMerkleRoot);
        }
        Ok(())
    }
}

/// Exactly one coinbase, in first position.
pub struct EnsureCoinbaseRule;

impl ConsensusRule for EnsureCoinbaseRule {
    fn name(&self) -> &'static str {
        "EnsureCoinbaseRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Integrity
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let transactions = &context.block.transactions;
        match transactions.first() {
            Some(first) if is_coinbase(first) => {}
            _ => return Err(ConsensusError::BadCoinbaseMissing),
        }
        if transactions.iter().skip(1).any(is_coinbase) {
            return Err(ConsensusError::BadMultipleCoinbase);
        }
        Ok(())
    }
}
