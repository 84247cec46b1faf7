//! Consensus rule chain
//!
//! A rule either passes silently or returns the named error that aborts the
//! chain. The registration order is part of a network's consensus rules, so
//! it is fixed by `ConsensusRuleEngine::for_network` and only the rule
//! implementations behind a position vary between consensus flavors.

pub mod coinview;
pub mod flavor;
pub mod header;
pub mod integrity;
pub mod partial;

use std::sync::Arc;

use tracing::{trace, warn};

use crate::chain::Checkpoints;
use crate::context::RuleContext;
use crate::error::Result;
use crate::network::{ConsensusKind, ConsensusParams, ConsensusSettings};
use crate::script::ScriptVerifier;

pub use self::coinview::{CoinViewRule, LoadCoinviewRule};
pub use self::flavor::ConsensusFlavor;
pub use self::header::{CheckpointsRule, HeaderTimeChecksRule, HeaderVersionRule};
pub use self::integrity::{BlockMerkleRootRule, EnsureCoinbaseRule};
pub use self::partial::{CoinbaseHeightRule, PosBlockShapeRule, TransactionLocktimeRule, TransactionStructureRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleCategory {
    /// Header-only checks, run before the block body is available.
    HeaderValidation,
    /// Block body matches its header.
    Integrity,
    /// Context-dependent checks that need no coin view.
    PartialValidation,
    /// Checks against the coin view.
    FullValidation,
}

pub trait ConsensusRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> RuleCategory;

    /// Runs the rule. Only fields of `context` may be mutated.
    fn run(&self, context: &mut RuleContext<'_>) -> Result<()>;
}

/// Ordered rule chain for one network.
#[derive(Default)]
pub struct ConsensusRuleEngine {
    rules: Vec<Box<dyn ConsensusRule>>,
}

impl ConsensusRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule. Rules must be registered in category order.
    pub fn register(mut self, rule: impl ConsensusRule + 'static) -> Self {
        debug_assert!(
            self.rules.last().map(|r| r.category() <= rule.category()).unwrap_or(true),
            "rule {} registered out of category order",
            rule.name()
        );
        self.rules.push(Box::new(rule));
        self
    }

    /// The rule chain of a network.
    pub fn for_network(
        params: Arc<ConsensusParams>,
        settings: &ConsensusSettings,
        script_verifier: Arc<dyn ScriptVerifier>,
    ) -> Self {
        let checkpoints = Checkpoints::new(params.checkpoints.clone(), settings.use_checkpoints);
        let flavor = ConsensusFlavor::from(params.kind);

        let engine = Self::new()
            .register(CheckpointsRule::new(checkpoints))
            .register(HeaderTimeChecksRule::new(params.max_future_block_time))
            .register(HeaderVersionRule::new(params.buried.clone()))
            .register(BlockMerkleRootRule)
            .register(EnsureCoinbaseRule)
            .register(TransactionStructureRule)
            .register(TransactionLocktimeRule)
            .register(CoinbaseHeightRule);

        let engine = match params.kind {
            ConsensusKind::ProofOfStake => engine.register(PosBlockShapeRule),
            ConsensusKind::ProofOfWork | ConsensusKind::ProofOfAuthority => engine,
        };

        engine
            .register(LoadCoinviewRule)
            .register(CoinViewRule::new(flavor, params, script_verifier))
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn validate_header(&self, context: &mut RuleContext<'_>) -> Result<()> {
        self.execute(RuleCategory::HeaderValidation, context)
    }

    pub fn validate_integrity(&self, context: &mut RuleContext<'_>) -> Result<()> {
        self.execute(RuleCategory::Integrity, context)
    }

    pub fn partial_validation(&self, context: &mut RuleContext<'_>) -> Result<()> {
        self.execute(RuleCategory::PartialValidation, context)
    }

    pub fn full_validation(&self, context: &mut RuleContext<'_>) -> Result<()> {
        self.execute(RuleCategory::FullValidation, context)
    }

    /// Runs every category in order, stopping at the first failure.
    pub fn validate(&self, context: &mut RuleContext<'_>) -> Result<()> {
        self.validate_header(context)?;
        self.validate_integrity(context)?;
        self.partial_validation(context)?;
        self.full_validation(context)
    }

    fn execute(&self, category: RuleCategory, context: &mut RuleContext<'_>) -> Result<()> {
        for rule in self.rules.iter().filter(|rule| rule.category() == category) {
            trace!(rule = rule.name(), height = context.height(), "executing rule");
            if let Err(err) = rule.run(context) {
                warn!(
                    rule = rule.name(),
                    height = context.height(),
                    code = err.code(),
                    "block failed consensus rule: {}",
                    err
                );
                return Err(err);
            }
        }
        Ok(())
    }
}
