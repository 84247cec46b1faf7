//! Block reward schedule and fee arithmetic

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::network::ConsensusParams;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℤ
///
/// Subsidy of an ordinary block at `height`, ignoring the premine.
/// With a halving interval H the subsidy is `initial >> ⌊height/H⌋`,
/// reaching zero after 64 halvings. A zero interval means a flat subsidy.
pub fn get_block_subsidy(params: &ConsensusParams, height: Height) -> Amount {
    if params.subsidy_halving_interval == 0 {
        return params.initial_subsidy;
    }

    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }

    params.initial_subsidy >> halvings
}

/// Whether `height` is the network's premine block.
pub fn is_premine(params: &ConsensusParams, height: Height) -> bool {
    params.premine_reward > 0 && height == params.premine_height
}

/// Sums output values, failing on out-of-range totals.
pub fn total_output_value(tx: &Transaction) -> Result<Amount> {
    let mut total: Amount = 0;
    for output in &tx.outputs {
        if !money_range(output.value) {
            return Err(ConsensusError::BadTransactionTooLargeOutput);
        }
        total = total
            .checked_add(output.value)
            .filter(|t| money_range(*t))
            .ok_or(ConsensusError::BadTransactionTooLargeTotalOutput)?;
    }
    Ok(total)
}

/// Whether `value` is a valid amount.
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Fee = Σ input values − Σ output values
pub fn calculate_fee(value_in: Amount, value_out: Amount) -> Result<Amount> {
    if value_in < value_out {
        return Err(ConsensusError::BadTransactionInBelowOut);
    }
    Ok(value_in - value_out)
}
