//! Consensus flavor strategies
//!
//! The coin view rule is shared by every network; reward, maturity and
//! coin-view bookkeeping differ and are selected here.

use crate::constants::MAX_MONEY;
use crate::context::RuleContext;
use crate::economic::{get_block_subsidy, is_premine, total_output_value};
use crate::error::{ConsensusError, Result};
use crate::network::{ConsensusKind, ConsensusParams};
use crate::transaction::is_coinstake;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusFlavor {
    ProofOfWork,
    ProofOfStake,
    ProofOfAuthority,
}

impl From<ConsensusKind> for ConsensusFlavor {
    fn from(kind: ConsensusKind) -> Self {
        match kind {
            ConsensusKind::ProofOfWork => ConsensusFlavor::ProofOfWork,
            ConsensusKind::ProofOfStake => ConsensusFlavor::ProofOfStake,
            ConsensusKind::ProofOfAuthority => ConsensusFlavor::ProofOfAuthority,
        }
    }
}

impl ConsensusFlavor {
    /// Reward a coinbase may claim at `height`, fees excluded.
    ///
    /// The premine block pays the premine on every flavor. Outside it,
    /// proof-of-authority blocks mint nothing.
    pub fn get_proof_of_work_reward(&self, params: &ConsensusParams, height: Height) -> Amount {
        if is_premine(params, height) {
            return params.premine_reward;
        }
        match self {
            ConsensusFlavor::ProofOfWork | ConsensusFlavor::ProofOfStake => get_block_subsidy(params, height),
            ConsensusFlavor::ProofOfAuthority => 0,
        }
    }

    /// A reward coin created at height H is spendable from H + maturity.
    pub fn check_maturity(&self, params: &ConsensusParams, coin: &Coin, spend_height: Height) -> Result<()> {
        let subject = match self {
            ConsensusFlavor::ProofOfStake => coin.is_reward(),
            ConsensusFlavor::ProofOfWork | ConsensusFlavor::ProofOfAuthority => coin.is_coinbase,
        };
        if subject && spend_height.saturating_sub(coin.height) < params.coinbase_maturity {
            return Err(ConsensusError::BadTransactionPrematureCoinbaseSpending {
                coin_height: coin.height,
                spend_height,
            });
        }
        Ok(())
    }

    /// Applies `tx` to the staged coin set. Proof-of-stake also records what
    /// the coinstake spent, for the stake reward check.
    pub fn update_coin_view(&self, context: &mut RuleContext<'_>, tx: &Transaction) -> Result<()> {
        let height = context.height();
        let value_in = context.unspent_outputs.update(tx, height)?;
        if *self == ConsensusFlavor::ProofOfStake && is_coinstake(tx) {
            context.coinstake_value_in = value_in;
        }
        Ok(())
    }

    /// CheckBlockReward
    ///
    /// Coinbase: Σ outputs ≤ fees + reward(h), else `BadCoinbaseAmount`.
    /// Proof-of-stake blocks instead bound the coinstake's gain:
    /// Σ coinstake outputs − coinstake inputs ≤ fees + stake reward.
    pub fn check_block_reward(&self, params: &ConsensusParams, context: &RuleContext<'_>) -> Result<()> {
        let transactions = &context.block.transactions;

        if *self == ConsensusFlavor::ProofOfStake && context.is_proof_of_stake() {
            let coinstake_out = total_output_value(&transactions[1])?;
            let actual = coinstake_out - context.coinstake_value_in;
            let limit = context
                .total_fees
                .saturating_add(params.proof_of_stake_reward)
                .min(MAX_MONEY);
            if actual > limit {
                return Err(ConsensusError::BadCoinstakeAmount { actual, limit });
            }
            return Ok(());
        }

        let coinbase = transactions.first().ok_or(ConsensusError::BadCoinbaseMissing)?;
        let actual = total_output_value(coinbase)?;
        let limit = context
            .total_fees
            .saturating_add(self.get_proof_of_work_reward(params, context.height()))
            .min(MAX_MONEY);
        if actual > limit {
            return Err(ConsensusError::BadCoinbaseAmount { actual, limit });
        }
        Ok(())
    }
}
