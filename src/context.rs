//! Rule context: per-validation scratch state
//!
//! Created fresh for each block validation attempt and dropped when the rule
//! chain finishes. Borrows the coin view for its lifetime; every mutation the
//! rules make is staged in `unspent_outputs`.

use std::sync::Arc;

use crate::chain::ChainedHeader;
use crate::coinview::{CoinView, CoinViewChanges, UnspentOutputSet};
use crate::deployments::DeploymentFlags;
use crate::transaction::is_coinstake;
use crate::types::*;

pub struct RuleContext<'a> {
    pub block: &'a Block,
    pub chained_header: Arc<ChainedHeader>,
    /// Validation time in seconds since the epoch.
    pub time: u64,
    pub flags: DeploymentFlags,
    /// Below a checkpoint or assume-valid: scripts are not verified.
    pub skip_validation: bool,
    pub coin_view: &'a dyn CoinView,
    pub unspent_outputs: UnspentOutputSet,
    /// Inputs the coin view could not supply, annotated by the load rule.
    pub missing_inputs: Vec<OutPoint>,
    /// Fees of the block's ordinary transactions.
    pub total_fees: Amount,
    /// Value spent by the block's coinstake, if any.
    pub coinstake_value_in: Amount,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        block: &'a Block,
        chained_header: Arc<ChainedHeader>,
        time: u64,
        flags: DeploymentFlags,
        skip_validation: bool,
        coin_view: &'a dyn CoinView,
    ) -> Self {
        Self {
            block,
            chained_header,
            time,
            flags,
            skip_validation,
            coin_view,
            unspent_outputs: UnspentOutputSet::new(),
            missing_inputs: Vec::new(),
            total_fees: 0,
            coinstake_value_in: 0,
        }
    }

    pub fn height(&self) -> Height {
        self.chained_header.height()
    }

    pub fn previous(&self) -> Option<&Arc<ChainedHeader>> {
        self.chained_header.previous()
    }

    /// A proof-of-stake block carries a coinstake as its second transaction.
    pub fn is_proof_of_stake(&self) -> bool {
        self.block
            .transactions
            .get(1)
            .map(is_coinstake)
            .unwrap_or(false)
    }

    /// Consumes the context, yielding the staged coin view batch.
    pub fn into_changes(self) -> CoinViewChanges {
        let old_tip = self.previous().map(|prev| prev.hash());
        let new_tip = self.chained_header.hash();
        let height = self.height();
        self.unspent_outputs.into_changes(old_tip, new_tip, height)
    }
}
