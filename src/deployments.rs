//! Node deployments: enforcement flags for a header
//!
//! Combines buried activation heights with the BIP9 states computed by
//! the threshold cache for the header's parent.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

use crate::chain::{ChainIndexer, ChainedHeader};
use crate::error::{ConsensusError, Result};
use crate::network::{ConsensusParams, DEPLOYMENT_CSV, DEPLOYMENT_SEGWIT};
use crate::threshold::{ThresholdConditionCache, ThresholdState};

bitflags! {
    /// Script verification flags handed to the script verifier.
    pub struct ScriptFlags: u32 {
        const NONE = 0;
        const P2SH = 1 << 0;
        const STRICTENC = 1 << 1;
        const DERSIG = 1 << 2;
        const LOW_S = 1 << 3;
        const NULLDUMMY = 1 << 4;
        const CHECKLOCKTIMEVERIFY = 1 << 9;
        const CHECKSEQUENCEVERIFY = 1 << 10;
        const WITNESS = 1 << 11;
    }
}

bitflags! {
    /// Lock time evaluation flags.
    pub struct LockTimeFlags: u32 {
        /// Enforce BIP68 relative lock times.
        const VERIFY_SEQUENCE = 1 << 0;
        /// Use median time past instead of block time for lock time cutoffs (BIP113).
        const MEDIAN_TIME_PAST = 1 << 1;
    }
}

/// Enforcement flags in effect for one header. Never mutated once returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentFlags {
    pub script_flags: ScriptFlags,
    pub lock_time_flags: LockTimeFlags,
    pub enforce_bip30: bool,
    pub enforce_bip34: bool,
}

impl DeploymentFlags {
    /// Flags of a block built before any soft fork.
    pub fn none() -> Self {
        Self {
            script_flags: ScriptFlags::NONE,
            lock_time_flags: LockTimeFlags::empty(),
            enforce_bip30: true,
            enforce_bip34: false,
        }
    }
}

impl Default for DeploymentFlags {
    fn default() -> Self {
        Self::none()
    }
}

/// Thin façade over the threshold cache. Shares the cache's lock, so reads
/// from block validation and informational queries are serialized.
pub struct NodeDeployments {
    params: Arc<ConsensusParams>,
    cache: Arc<ThresholdConditionCache>,
}

impl NodeDeployments {
    pub fn new(params: Arc<ConsensusParams>) -> Result<Self> {
        params
            .validate()
            .map_err(|_| ConsensusError::InvalidArgument("consensus parameters"))?;
        let cache = Arc::new(ThresholdConditionCache::new(Arc::clone(&params)));
        Ok(Self { params, cache })
    }

    pub fn threshold_cache(&self) -> &Arc<ThresholdConditionCache> {
        &self.cache
    }

    pub fn params(&self) -> &Arc<ConsensusParams> {
        &self.params
    }

    /// GetFlags: flags in effect for `header`.
    ///
    /// BIP9 states come from the header's parent: a block cannot put its own
    /// signal into effect.
    pub fn get_flags(&self, header: &Arc<ChainedHeader>) -> DeploymentFlags {
        let height = header.height();
        let states = self.cache.get_states(header.previous());
        let buried = &self.params.buried;

        let mut flags = DeploymentFlags::none();
        if height >= buried.bip16 {
            flags.script_flags |= ScriptFlags::P2SH;
        }
        if height >= buried.bip34 {
            flags.enforce_bip34 = true;
            flags.enforce_bip30 = false;
        }
        if height >= buried.bip66 {
            flags.script_flags |= ScriptFlags::DERSIG;
        }
        if height >= buried.bip65 {
            flags.script_flags |= ScriptFlags::CHECKLOCKTIMEVERIFY;
        }
        if is_active(&states, DEPLOYMENT_CSV) {
            flags.script_flags |= ScriptFlags::CHECKSEQUENCEVERIFY;
            flags.lock_time_flags |= LockTimeFlags::VERIFY_SEQUENCE | LockTimeFlags::MEDIAN_TIME_PAST;
        }
        if is_active(&states, DEPLOYMENT_SEGWIT) {
            flags.script_flags |= ScriptFlags::WITNESS | ScriptFlags::NULLDUMMY;
        }

        debug!(height, ?flags, "computed deployment flags");
        flags
    }

    /// GetFlags for the current chain tip.
    pub fn get_flags_at_tip(&self, chain: &dyn ChainIndexer) -> Result<DeploymentFlags> {
        let tip = chain
            .tip()
            .ok_or(ConsensusError::InvalidArgument("chain has no tip"))?;
        Ok(self.get_flags(&tip))
    }

    /// BIP9 states for the block following `prev`.
    pub fn get_states(&self, prev: Option<&Arc<ChainedHeader>>) -> Vec<ThresholdState> {
        self.cache.get_states(prev)
    }
}

fn is_active(states: &[ThresholdState], deployment: usize) -> bool {
    states.get(deployment) == Some(&ThresholdState::Active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_utils::build_chain;
    use crate::constants::*;
    use crate::network::BuriedDeployments;

    fn deployments(params: ConsensusParams) -> NodeDeployments {
        NodeDeployments::new(Arc::new(params)).unwrap()
    }

    #[test]
    fn test_buried_heights() {
        let mut params = ConsensusParams::regtest();
        params.buried = BuriedDeployments { bip16: 1, bip34: 2, bip65: 4, bip66: 3 };
        let nd = deployments(params);

        let tip = build_chain(None, 5, 1, 1_000, 600);
        let at = |h| nd.get_flags(&tip.get_ancestor(h).unwrap());

        assert_eq!(at(0).script_flags & ScriptFlags::P2SH, ScriptFlags::NONE);
        assert!(at(1).script_flags.contains(ScriptFlags::P2SH));
        assert!(at(1).enforce_bip30);
        assert!(at(2).enforce_bip34);
        assert!(!at(2).enforce_bip30);
        assert!(at(3).script_flags.contains(ScriptFlags::DERSIG));
        assert!(!at(3).script_flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY));
        assert!(at(4).script_flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY));
    }

    #[test]
    fn test_always_active_segwit_in_regtest() {
        let nd = deployments(ConsensusParams::regtest());
        let tip = build_chain(None, 3, 1, 1_000, 600);
        let flags = nd.get_flags(&tip);
        assert!(flags.script_flags.contains(ScriptFlags::WITNESS));
        assert!(!flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE));
    }

    #[test]
    fn test_csv_activation_enables_sequence_locks() {
        let mut params = ConsensusParams::regtest();
        params.miner_confirmation_window = 10;
        params.rule_change_activation_threshold = 8;
        let nd = deployments(params);

        let signal = VERSIONBITS_TOP_BITS | 1;
        // Window 0 (heights 0..9) starts the deployment, window 1 signals,
        // window 2 is locked in, block 30 is the first with CSV active.
        let tip = build_chain(None, 19, signal, 1_000, 600);
        let tip = build_chain(Some(tip), 10, VERSIONBITS_TOP_BITS, 0, 600);
        assert_eq!(tip.height(), 29);
        assert!(!nd.get_flags(&tip).lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE));

        let next = build_chain(Some(tip), 1, VERSIONBITS_TOP_BITS, 0, 600);
        let flags = nd.get_flags(&next);
        assert!(flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE));
        assert!(flags.script_flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY));
    }

    #[test]
    fn test_get_flags_is_pure() {
        let nd = deployments(ConsensusParams::regtest());
        let tip = build_chain(None, 300, VERSIONBITS_TOP_BITS | 1, 1_000, 600);
        assert_eq!(nd.get_flags(&tip), nd.get_flags(&tip));
    }

    #[test]
    fn test_get_flags_at_tip_requires_tip() {
        let nd = deployments(ConsensusParams::regtest());
        let empty: Option<Arc<ChainedHeader>> = None;
        assert_eq!(
            nd.get_flags_at_tip(&empty),
            Err(ConsensusError::InvalidArgument("chain has no tip"))
        );

        let tip = Some(build_chain(None, 2, 1, 1_000, 600));
        assert!(nd.get_flags_at_tip(&tip).is_ok());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = ConsensusParams::regtest();
        params.miner_confirmation_window = 0;
        assert!(NodeDeployments::new(Arc::new(params)).is_err());
    }
}
