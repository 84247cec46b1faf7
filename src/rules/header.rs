//! Header validation rules

use crate::chain::Checkpoints;
use crate::context::RuleContext;
use crate::error::{ConsensusError, Result};
use crate::network::BuriedDeployments;
use crate::rules::{ConsensusRule, RuleCategory};

/// Rejects a header whose hash differs from a hard checkpoint at its height.
pub struct CheckpointsRule {
    checkpoints: Checkpoints,
}

impl CheckpointsRule {
    pub fn new(checkpoints: Checkpoints) -> Self {
        Self { checkpoints }
    }
}

impl ConsensusRule for CheckpointsRule {
    fn name(&self) -> &'static str {
        "CheckpointsRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HeaderValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let height = context.height();
        if !self.checkpoints.check_hardened(height, &context.chained_header.hash()) {
            return Err(ConsensusError::CheckpointMismatch(height));
        }
        Ok(())
    }
}

/// Block time must exceed the parent's median time past and must not run
/// more than `max_future_block_time` ahead of the validation time.
pub struct HeaderTimeChecksRule {
    max_future_block_time: u64,
}

impl HeaderTimeChecksRule {
    pub fn new(max_future_block_time: u64) -> Self {
        Self { max_future_block_time }
    }
}

impl ConsensusRule for HeaderTimeChecksRule {
    fn name(&self) -> &'static str {
        "HeaderTimeChecksRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HeaderValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let timestamp = context.chained_header.header().timestamp;

        if let Some(prev) = context.previous() {
            if i64::from(timestamp) <= prev.median_time_past() {
                return Err(ConsensusError::TimeTooOld);
            }
        }

        if u64::from(timestamp) > context.time.saturating_add(self.max_future_block_time) {
            return Err(ConsensusError::TimeTooNew);
        }
        Ok(())
    }
}

/// Rejects outdated block versions once the buried forks that retired them
/// are in force: version 2 from BIP34, 3 from BIP66, 4 from BIP65.
pub struct HeaderVersionRule {
    buried: BuriedDeployments,
}

impl HeaderVersionRule {
    pub fn new(buried: BuriedDeployments) -> Self {
        Self { buried }
    }

    fn minimum_version(&self, height: u32) -> i32 {
        if height >= self.buried.bip65 {
            4
        } else if height >= self.buried.bip66 {
            3
        } else if height >= self.buried.bip34 {
            2
        } else {
            1
        }
    }
}

impl ConsensusRule for HeaderVersionRule {
    fn name(&self) -> &'static str {
        "HeaderVersionRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HeaderValidation
    }

    fn run(&self, context: &mut RuleContext<'_>) -> Result<()> {
        let height = context.height();
        let version = context.chained_header.header().version;
        if version < self.minimum_version(height) {
            return Err(ConsensusError::BadVersion { version, height });
        }
        Ok(())
    }
}
