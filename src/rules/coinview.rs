//! Full validation against the coin view

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::RuleContext;
use crate::deployments::LockTimeFlags;
use crate::economic::{calculate_fee, money_range, total_output_value};
use crate::error::{ConsensusError, Result};
use crate::network::ConsensusParams;
use crate::rules::{ConsensusFlavor, ConsensusRule, RuleCategory};
use crate::script::ScriptVerifier;
use crate::transaction::{calculate_sequence_locks, calculate_tx_id, evaluate_sequence_locks, is_coinbase, is_coinstake};
use crate::types::*;

/// Loads every coin the block spends into the staging set with one batched
/// lookup. Under BIP30 the block's own output outpoints are loaded too, so
/// the coin view rule can detect overwrites.
pub struct LoadCoinviewRule;

impl ConsensusRule for LoadCoinviewRule {
    fn name(&self) -> &'static str {
        "LoadCoinviewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let block = context.block;
        let mut created = HashSet::new();
        let mut outpoints = Vec::new();

        for tx in &block.transactions {
            if !is_coinbase(tx) {
                outpoints.extend(tx.inputs.iter().map(|input| input.prevout));
            }
            let txid = calculate_tx_id(tx);
            for index in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint::new(txid, index);
                created.insert(outpoint);
                if context.flags.enforce_bip30 {
                    outpoints.push(outpoint);
                }
            }
        }

        let response = context.coin_view.fetch_coins(&outpoints)?;
        context.missing_inputs = response
            .iter()
            .filter(|output| output.is_spent() && !created.contains(&output.outpoint))
            .map(|output| output.outpoint)
            .collect();
        context.unspent_outputs.set_coins(response);
        Ok(())
    }
}

/// ConnectBlock: per transaction, in block order
/// 1. BIP30: no output may overwrite an unspent coin
/// 2. all inputs present in the staging set
/// 3. BIP68 sequence locks, when enforced
/// 4. maturity of spent rewards, input value range, Σ in ≥ Σ out
/// 5. script verification, unless the block is below a checkpoint or assume-valid
/// 6. spend inputs and create outputs in the staging set
///
/// then the block reward check of the network's flavor.
pub struct CoinViewRule {
    flavor: ConsensusFlavor,
    params: Arc<ConsensusParams>,
    script_verifier: Arc<dyn ScriptVerifier>,
}

impl CoinViewRule {
    pub fn new(flavor: ConsensusFlavor, params: Arc<ConsensusParams>, script_verifier: Arc<dyn ScriptVerifier>) -> Self {
        Self { flavor, params, script_verifier }
    }

    fn check_inputs(&self, context: &RuleContext<'_>, tx: &Transaction) -> Result<Amount> {
        let spend_height = context.height();
        let mut value_in: Amount = 0;
        for input in &tx.inputs {
            let coin = context
                .unspent_outputs
                .access_coin(&input.prevout)
                .ok_or(ConsensusError::BadTransactionMissingInput)?;
            self.flavor.check_maturity(&self.params, coin, spend_height)?;
            if !money_range(coin.value) {
                return Err(ConsensusError::BadTransactionInputValueOutOfRange);
            }
            value_in = value_in
                .checked_add(coin.value)
                .filter(|total| money_range(*total))
                .ok_or(ConsensusError::BadTransactionInputValueOutOfRange)?;
        }
        Ok(value_in)
    }

    fn check_sequence_locks(&self, context: &RuleContext<'_>, tx: &Transaction) -> Result<()> {
        let prev = match context.previous() {
            Some(prev) => prev,
            None => return Ok(()),
        };
        let prev_heights: Vec<Height> = tx
            .inputs
            .iter()
            .map(|input| {
                context
                    .unspent_outputs
                    .access_coin(&input.prevout)
                    .map(|coin| coin.height)
                    .ok_or(ConsensusError::BadTransactionMissingInput)
            })
            .collect::<Result<_>>()?;
        let lock_points = calculate_sequence_locks(tx, context.flags.lock_time_flags, &prev_heights, prev);
        if !evaluate_sequence_locks(prev, &lock_points) {
            return Err(ConsensusError::BadTransactionNonFinal);
        }
        Ok(())
    }

    fn check_scripts(&self, context: &RuleContext<'_>, tx: &Transaction) -> Result<()> {
        for (index, input) in tx.inputs.iter().enumerate() {
            let coin = context
                .unspent_outputs
                .access_coin(&input.prevout)
                .ok_or(ConsensusError::BadTransactionMissingInput)?;
            if !self
                .script_verifier
                .verify_input(tx, index, coin, context.flags.script_flags)
            {
                return Err(ConsensusError::BadTransactionScriptError {
                    txid: calculate_tx_id(tx),
                    input: index,
                });
            }
        }
        Ok(())
    }
}

impl ConsensusRule for CoinViewRule {
    fn name(&self) -> &'static str {
        "CoinViewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let block = context.block;

        for tx in &block.transactions {
            if context.flags.enforce_bip30 {
                let txid = calculate_tx_id(tx);
                let overwrites = (0..tx.outputs.len() as u32)
                    .any(|index| context.unspent_outputs.access_coin(&OutPoint::new(txid, index)).is_some());
                if overwrites {
                    return Err(ConsensusError::BadTransactionBip30);
                }
            }

            if !is_coinbase(tx) {
                if !context.unspent_outputs.have_inputs(tx) {
                    return Err(ConsensusError::BadTransactionMissingInput);
                }

                if context.flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE) {
                    self.check_sequence_locks(context, tx)?;
                }

                let value_in = self.check_inputs(context, tx)?;
                if !is_coinstake(tx) {
                    let fee = calculate_fee(value_in, total_output_value(tx)?)?;
                    context.total_fees = context
                        .total_fees
                        .checked_add(fee)
                        .filter(|total| money_range(*total))
                        .ok_or(ConsensusError::BadTransactionInputValueOutOfRange)?;
                }

                if !context.skip_validation {
                    self.check_scripts(context, tx)?;
                }
            }

            self.flavor.update_coin_view(context, tx)?;
        }

        self.flavor.check_block_reward(&self.params, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::build_coinbase;
    use crate::coinview::{CoinView, InMemoryCoinView};
    use crate::constants::COIN;
    use crate::deployments::DeploymentFlags;
    use crate::rules::test_utils::*;
    use crate::script::{AcceptAllScripts, ScriptEquality};

    fn coin(value: Amount, height: Height, is_coinbase: bool) -> Coin {
        Coin { value, script_pubkey: vec![0x51], height, is_coinbase, is_coinstake: false }
    }

    fn rule(verifier: Arc<dyn ScriptVerifier>) -> CoinViewRule {
        CoinViewRule::new(ConsensusFlavor::ProofOfWork, Arc::new(ConsensusParams::regtest()), verifier)
    }

    fn run_block(
        view: &InMemoryCoinView,
        rule: &CoinViewRule,
        transactions: Vec<Transaction>,
        skip_validation: bool,
    ) -> (Result<()>, Vec<OutPoint>) {
        let (_, genesis) = genesis_block(0);
        let (block, header) = block_on(&genesis, transactions);
        let mut context = RuleContext::new(&block, header, u64::MAX, DeploymentFlags::none(), skip_validation, view);
        let result = LoadCoinviewRule.run(&mut context).and_then(|_| rule.run(&mut context));
        (result, context.missing_inputs)
    }

    #[test]
    fn test_coinbase_reward_limit() {
        let funding = OutPoint::new([1; 32], 0);
        let view = InMemoryCoinView::with_coins(None, vec![(funding, coin(10 * COIN, 0, false))]);
        let rule = rule(Arc::new(AcceptAllScripts));
        let paying = spend(funding, 9 * COIN);

        // Subsidy at height 1 is 50 coins, plus one coin of fees.
        let (ok, _) = run_block(&view, &rule, vec![build_coinbase(1, 51 * COIN, vec![0x51]), paying.clone()], false);
        assert_eq!(ok, Ok(()));

        let (too_much, _) = run_block(&view, &rule, vec![build_coinbase(1, 51 * COIN + 1, vec![0x51]), paying], false);
        assert_eq!(
            too_much,
            Err(ConsensusError::BadCoinbaseAmount { actual: 51 * COIN + 1, limit: 51 * COIN })
        );
    }

    #[test]
    fn test_missing_input_reported() {
        let view = InMemoryCoinView::new();
        let absent = OutPoint::new([3; 32], 1);
        let (result, missing) = run_block(
            &view,
            &rule(Arc::new(AcceptAllScripts)),
            vec![build_coinbase(1, 0, vec![0x51]), spend(absent, 1)],
            false,
        );
        assert_eq!(result, Err(ConsensusError::BadTransactionMissingInput));
        assert_eq!(missing, vec![absent]);
    }

    #[test]
    fn test_spend_within_block_is_not_missing() {
        let funding = OutPoint::new([1; 32], 0);
        let view = InMemoryCoinView::with_coins(None, vec![(funding, coin(10, 0, false))]);
        let parent = spend(funding, 10);
        let child = spend(OutPoint::new(calculate_tx_id(&parent), 0), 10);
        let (result, missing) = run_block(
            &view,
            &rule(Arc::new(AcceptAllScripts)),
            vec![build_coinbase(1, 0, vec![0x51]), parent, child],
            false,
        );
        assert_eq!(result, Ok(()));
        assert!(missing.is_empty());
    }

    #[test]
    fn test_immature_coinbase_spend() {
        let funding = OutPoint::new([1; 32], 0);
        let view = InMemoryCoinView::with_coins(None, vec![(funding, coin(10, 0, true))]);
        let (result, _) = run_block(
            &view,
            &rule(Arc::new(AcceptAllScripts)),
            vec![build_coinbase(1, 0, vec![0x51]), spend(funding, 10)],
            false,
        );
        assert_eq!(
            result,
            Err(ConsensusError::BadTransactionPrematureCoinbaseSpending { coin_height: 0, spend_height: 1 })
        );
    }

    #[test]
    fn test_value_out_above_in() {
        let funding = OutPoint::new([1; 32], 0);
        let view = InMemoryCoinView::with_coins(None, vec![(funding, coin(10, 0, false))]);
        let (result, _) = run_block(
            &view,
            &rule(Arc::new(AcceptAllScripts)),
            vec![build_coinbase(1, 0, vec![0x51]), spend(funding, 11)],
            false,
        );
        assert_eq!(result, Err(ConsensusError::BadTransactionInBelowOut));
    }

    #[test]
    fn test_bip30_overwrite() {
        let coinbase = build_coinbase(1, 0, vec![0x51]);
        let existing = OutPoint::new(calculate_tx_id(&coinbase), 0);
        let view = InMemoryCoinView::with_coins(None, vec![(existing, coin(1, 0, true))]);
        let (result, _) = run_block(&view, &rule(Arc::new(AcceptAllScripts)), vec![coinbase], false);
        assert_eq!(result, Err(ConsensusError::BadTransactionBip30));
    }

    #[test]
    fn test_scripts_skipped_when_assumed_valid() {
        let funding = OutPoint::new([1; 32], 0);
        let mut locked = coin(10, 0, false);
        locked.script_pubkey = vec![0x52];
        let view = InMemoryCoinView::with_coins(None, vec![(funding, locked)]);
        let rule = rule(Arc::new(ScriptEquality));
        let transactions = vec![build_coinbase(1, 0, vec![0x51]), spend(funding, 10)];

        let (checked, _) = run_block(&view, &rule, transactions.clone(), false);
        assert!(matches!(checked, Err(ConsensusError::BadTransactionScriptError { input: 0, .. })));

        let (skipped, _) = run_block(&view, &rule, transactions, true);
        assert_eq!(skipped, Ok(()));
    }

    #[test]
    fn test_rules_do_not_touch_coin_view() {
        let funding = OutPoint::new([1; 32], 0);
        let view = InMemoryCoinView::with_coins(None, vec![(funding, coin(10, 0, false))]);
        let (result, _) = run_block(
            &view,
            &rule(Arc::new(AcceptAllScripts)),
            vec![build_coinbase(1, 0, vec![0x51]), spend(funding, 10)],
            false,
        );
        assert_eq!(result, Ok(()));
        assert!(view.have_coins(&funding).unwrap());
    }
}
