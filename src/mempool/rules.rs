//! Mempool admission rule chain

use std::sync::Arc;

use crate::chain::ChainedHeader;
use crate::coinview::FetchCoinsResponse;
use crate::deployments::{DeploymentFlags, LockTimeFlags};
use crate::economic::{money_range, total_output_value};
use crate::error::{ConsensusError, Result};
use crate::mempool::pool::{MempoolCoinView, MempoolEntry, TxMempool};
use crate::network::{ConsensusParams, ConsensusSettings};
use crate::rules::ConsensusFlavor;
use crate::script::ScriptVerifier;
use crate::transaction::{
    calculate_sequence_locks, check_transaction, evaluate_sequence_locks, is_coinbase, is_coinstake, is_final_tx,
    transaction_size, LockPoints,
};
use crate::types::*;

/// Outcome details of one admission attempt, kept for the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MempoolValidationState {
    /// An input was missing or spent; the transaction may be held as an orphan.
    pub missing_inputs: bool,
    pub error: Option<ConsensusError>,
}

impl MempoolValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Scratch state for validating one transaction against the pool.
pub struct MempoolValidationContext<'a> {
    pub tx: &'a Transaction,
    pub txid: Hash,
    /// Validation time in seconds since the epoch.
    pub time: u64,
    pub tip: Arc<ChainedHeader>,
    pub flags: DeploymentFlags,
    pub params: &'a ConsensusParams,
    pub settings: &'a ConsensusSettings,
    pub pool: &'a TxMempool,
    pub view: MempoolCoinView<'a>,
    pub state: &'a mut MempoolValidationState,
    /// Coins spent by `tx`, loaded by the coin view rule.
    pub coins: FetchCoinsResponse,
    pub lock_points: LockPoints,
    pub entry: Option<MempoolEntry>,
}

impl<'a> MempoolValidationContext<'a> {
    /// Height of the block the transaction would be mined in.
    pub fn next_height(&self) -> Height {
        self.tip.height() + 1
    }

    fn spent_coin(&self, outpoint: &OutPoint) -> Result<&Coin> {
        self.coins.coin(outpoint).ok_or(ConsensusError::MissingOrSpentInputs)
    }
}

pub trait MempoolRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()>;
}

/// The admission chain, in order.
pub fn default_mempool_rules(
    flavor: ConsensusFlavor,
    script_verifier: Arc<dyn ScriptVerifier>,
) -> Vec<Box<dyn MempoolRule>> {
    vec![
        Box::new(CheckTransactionMempoolRule),
        Box::new(CheckFinalTransactionMempoolRule),
        Box::new(CheckConflictsMempoolRule),
        Box::new(CheckCoinViewMempoolRule),
        Box::new(CreateMempoolEntryMempoolRule::new(flavor)),
        Box::new(CheckAllInputsMempoolRule::new(script_verifier)),
    ]
}

/// Structural checks. Rewards only enter the chain inside blocks.
pub struct CheckTransactionMempoolRule;

impl MempoolRule for CheckTransactionMempoolRule {
    fn name(&self) -> &'static str {
        "CheckTransactionMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        check_transaction(context.tx)?;
        if is_coinbase(context.tx) || is_coinstake(context.tx) {
            return Err(ConsensusError::TxCoinbase);
        }
        Ok(())
    }
}

/// The transaction must be final in the next block.
pub struct CheckFinalTransactionMempoolRule;

impl MempoolRule for CheckFinalTransactionMempoolRule {
    fn name(&self) -> &'static str {
        "CheckFinalTransactionMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        let cutoff = if context.flags.lock_time_flags.contains(LockTimeFlags::MEDIAN_TIME_PAST) {
            context.tip.median_time_past()
        } else {
            i64::try_from(context.time).unwrap_or(i64::MAX)
        };
        if !is_final_tx(context.tx, context.next_height(), cutoff) {
            return Err(ConsensusError::TxNonFinal);
        }
        Ok(())
    }
}

/// No input may already be spent by another pool transaction.
pub struct CheckConflictsMempoolRule;

impl MempoolRule for CheckConflictsMempoolRule {
    fn name(&self) -> &'static str {
        "CheckConflictsMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        for input in &context.tx.inputs {
            match context.pool.spender(&input.prevout) {
                // A resubmission shares its inputs with itself; the coin view
                // rule reports it as already known.
                Some(spender) if *spender != context.txid => {
                    return Err(ConsensusError::MempoolConflict(input.prevout));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Coin view checks:
/// 1. outputs of this txid already visible → already known
/// 2. first missing input → missing-inputs, orphan-eligible
/// 3. BIP68 lock points for the next block
pub struct CheckCoinViewMempoolRule;

impl MempoolRule for CheckCoinViewMempoolRule {
    fn name(&self) -> &'static str {
        "CheckCoinViewMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        if context.view.have_transaction(&context.txid)? {
            return Err(ConsensusError::TxAlreadyKnown);
        }

        let outpoints: Vec<OutPoint> = context.tx.inputs.iter().map(|input| input.prevout).collect();
        let coins = context.view.fetch_coins(&outpoints)?;
        if outpoints.iter().any(|outpoint| coins.coin(outpoint).is_none()) {
            context.state.missing_inputs = true;
            return Err(ConsensusError::MissingOrSpentInputs);
        }

        let prev_heights: Vec<Height> = outpoints
            .iter()
            .filter_map(|outpoint| coins.coin(outpoint).map(|coin| coin.height))
            .collect();
        let lock_points = calculate_sequence_locks(context.tx, context.flags.lock_time_flags, &prev_heights, &context.tip);
        if !evaluate_sequence_locks(&context.tip, &lock_points) {
            return Err(ConsensusError::NonBip68Final);
        }

        context.coins = coins;
        context.lock_points = lock_points;
        Ok(())
    }
}

/// Fee and maturity checks, then the pool entry itself.
pub struct CreateMempoolEntryMempoolRule {
    flavor: ConsensusFlavor,
}

impl CreateMempoolEntryMempoolRule {
    pub fn new(flavor: ConsensusFlavor) -> Self {
        Self { flavor }
    }
}

impl MempoolRule for CreateMempoolEntryMempoolRule {
    fn name(&self) -> &'static str {
        "CreateMempoolEntryMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        let spend_height = context.next_height();
        let mut value_in: Amount = 0;
        let mut spends_coinbase = false;
        for input in &context.tx.inputs {
            let coin = context.spent_coin(&input.prevout)?;
            self.flavor.check_maturity(context.params, coin, spend_height)?;
            spends_coinbase |= coin.is_coinbase;
            value_in = value_in
                .checked_add(coin.value)
                .filter(|total| money_range(*total))
                .ok_or(ConsensusError::BadTransactionInputValueOutOfRange)?;
        }

        let value_out = total_output_value(context.tx)?;
        if value_in < value_out {
            return Err(ConsensusError::BadInputsBelowOut);
        }
        let fee = value_in - value_out;

        let size = transaction_size(context.tx);
        let required = context.settings.min_relay_fee_per_kb.saturating_mul(size as Amount) / 1000;
        if fee < required {
            return Err(ConsensusError::MinRelayFeeNotMet { fee, required });
        }

        context.entry = Some(MempoolEntry {
            tx: context.tx.clone(),
            txid: context.txid,
            fee,
            size,
            time: context.time,
            entry_height: context.tip.height(),
            lock_points: context.lock_points,
            spends_coinbase,
        });
        Ok(())
    }
}

/// Script verification under the flags in force at the tip.
pub struct CheckAllInputsMempoolRule {
    script_verifier: Arc<dyn ScriptVerifier>,
}

impl CheckAllInputsMempoolRule {
    pub fn new(script_verifier: Arc<dyn ScriptVerifier>) -> Self {
        Self { script_verifier }
    }
}

impl MempoolRule for CheckAllInputsMempoolRule {
    fn name(&self) -> &'static str {
        "CheckAllInputsMempoolRule"
    }

    fn check(&self, context: &mut MempoolValidationContext<'_>) -> Result<()> {
        for (index, input) in context.tx.inputs.iter().enumerate() {
            let coin = context.spent_coin(&input.prevout)?;
            if !self
                .script_verifier
                .verify_input(context.tx, index, coin, context.flags.script_flags)
            {
                return Err(ConsensusError::BadTransactionScriptError {
                    txid: context.txid,
                    input: index,
                });
            }
        }
        Ok(())
    }
}
