//! Partial validation: context-dependent checks that need no coin view

use crate::block::{block_size, coinbase_height_script};
use crate::constants::MAX_BLOCK_SIZE;
use crate::context::RuleContext;
use crate::deployments::LockTimeFlags;
use crate::error::{ConsensusError, Result};
use crate::rules::{ConsensusRule, RuleCategory};
use crate::transaction::{check_transaction, is_coinbase, is_coinstake, is_final_tx};

/// CheckBlock transaction loop: block size bound, then
/// `check_transaction` on every transaction in order.
pub struct TransactionStructureRule;

impl ConsensusRule for TransactionStructureRule {
    fn name(&self) -> &'static str {
        "TransactionStructureRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        if block_size(context.block) > MAX_BLOCK_SIZE {
            return Err(ConsensusError::BadBlockLength);
        }
        for tx in &context.block.transactions {
            check_transaction(tx)?;
        }
        Ok(())
    }
}

/// Every transaction must be final at the block's height.
///
/// Under BIP113 the time cutoff is the parent's median time past instead of
/// the block's own timestamp.
pub struct TransactionLocktimeRule;

impl ConsensusRule for TransactionLocktimeRule {
    fn name(&self) -> &'static str {
        "TransactionLocktimeRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let height = context.height();
        let cutoff = match context.previous() {
            Some(prev) if context.flags.lock_time_flags.contains(LockTimeFlags::MEDIAN_TIME_PAST) => {
                prev.median_time_past()
            }
            _ => i64::from(context.block.header.timestamp),
        };

        if context
            .block
            .transactions
            .iter()
            .any(|tx| !is_final_tx(tx, height, cutoff))
        {
            return Err(ConsensusError::BadTransactionNonFinal);
        }
        Ok(())
    }
}

/// BIP34: once enforced, the coinbase script starts with the serialized height.
pub struct CoinbaseHeightRule;

impl ConsensusRule for CoinbaseHeightRule {
    fn name(&self) -> &'static str {
        "CoinbaseHeightRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        if !context.flags.enforce_bip34 {
            return Ok(());
        }
        let expected = coinbase_height_script(context.height());
        let script = context
            .block
            .transactions
            .first()
            .filter(|tx| is_coinbase(tx))
            .map(|tx| tx.inputs[0].script_sig.as_slice())
            .ok_or(ConsensusError::BadCoinbaseMissing)?;
        if !script.starts_with(&expected) {
            return Err(ConsensusError::BadCoinbaseHeight);
        }
        Ok(())
    }
}

/// Proof-of-stake block shape: a coinstake may only appear second, and a
/// block that carries one pays nothing through its coinbase.
pub struct PosBlockShapeRule;

impl ConsensusRule for PosBlockShapeRule {
    fn name(&self) -> &'static str {
        "PosBlockShapeRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let transactions = &context.block.transactions;
        let misplaced = transactions
            .iter()
            .enumerate()
            .any(|(index, tx)| index != 1 && is_coinstake(tx));
        if misplaced {
            return Err(ConsensusError::BadMultipleCoinstake);
        }

        if context.is_proof_of_stake() {
            let coinbase_pays = transactions
                .first()
                .map(|coinbase| coinbase.outputs.iter().any(|output| !output.is_empty()))
                .unwrap_or(false);
            if coinbase_pays {
                return Err(ConsensusError::BadStakeBlockCoinbase);
            }
        }
        Ok(())
    }
}
