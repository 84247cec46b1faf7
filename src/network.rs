//! Network consensus parameters
//!
//! Everything here is configuration: it is read by the rule chains and the
//! deployment cache but never computed by them.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::*;

/// Which reward/maturity strategy the coin view rule plugs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    ProofOfWork,
    ProofOfStake,
    ProofOfAuthority,
}

/// A BIP9 version-bits deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bip9Deployment {
    pub name: String,
    pub bit: u8,
    /// Median time past at which signalling may start, or `ALWAYS_ACTIVE` / `NEVER_ACTIVE`.
    pub start_time: i64,
    /// Median time past after which a started deployment fails.
    pub timeout: i64,
    /// Overrides the network threshold when set.
    #[serde(default)]
    pub threshold: Option<u32>,
    /// LockedIn deployments wait for this height before turning Active.
    #[serde(default)]
    pub min_activation_height: u32,
}

impl Bip9Deployment {
    pub fn new(name: &str, bit: u8, start_time: i64, timeout: i64) -> Self {
        Self {
            name: name.to_string(),
            bit,
            start_time,
            timeout,
            threshold: None,
            min_activation_height: 0,
        }
    }

    /// Version mask of the signalling bit.
    pub fn mask(&self) -> i32 {
        1i32 << self.bit
    }
}

/// Heights of soft forks activated by hard-coded height rather than voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuriedDeployments {
    pub bip16: Height,
    pub bip34: Height,
    pub bip65: Height,
    pub bip66: Height,
}

/// Index of well-known BIP9 deployments in `ConsensusParams::deployments`.
pub const DEPLOYMENT_TESTDUMMY: usize = 0;
pub const DEPLOYMENT_CSV: usize = 1;
pub const DEPLOYMENT_SEGWIT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub name: String,
    pub kind: ConsensusKind,
    /// Retarget window length used for deployment voting.
    pub miner_confirmation_window: u32,
    /// Signalling blocks needed within one window.
    pub rule_change_activation_threshold: u32,
    /// BIP9 deployments; index order is the order of `ThresholdState` results.
    pub deployments: Vec<Bip9Deployment>,
    pub buried: BuriedDeployments,
    pub coinbase_maturity: u32,
    pub premine_height: Height,
    pub premine_reward: Amount,
    pub initial_subsidy: Amount,
    /// Zero disables halving.
    pub subsidy_halving_interval: u32,
    /// Fixed reward of a proof-of-stake block.
    pub proof_of_stake_reward: Amount,
    pub max_future_block_time: u64,
    /// Hard checkpoints: height to block hash.
    #[serde(default)]
    pub checkpoints: BTreeMap<Height, Hash>,
}

impl ConsensusParams {
    /// Bitcoin-like main network parameters.
    pub fn main() -> Self {
        Self {
            name: "main".to_string(),
            kind: ConsensusKind::ProofOfWork,
            miner_confirmation_window: 2016,
            rule_change_activation_threshold: 1916,
            deployments: vec![
                Bip9Deployment::new("testdummy", 28, 1_199_145_601, 1_230_767_999),
                Bip9Deployment::new("csv", 0, 1_462_060_800, 1_493_596_800),
                Bip9Deployment::new("segwit", 1, 1_479_168_000, 1_510_704_000),
            ],
            buried: BuriedDeployments {
                bip16: 173_805,
                bip34: 227_931,
                bip65: 388_381,
                bip66: 363_725,
            },
            coinbase_maturity: 100,
            premine_height: 0,
            premine_reward: 0,
            initial_subsidy: 50 * COIN,
            subsidy_halving_interval: 210_000,
            proof_of_stake_reward: 0,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
            checkpoints: BTreeMap::new(),
        }
    }

    /// Regression test parameters: short windows, everything buried at genesis.
    pub fn regtest() -> Self {
        Self {
            name: "regtest".to_string(),
            kind: ConsensusKind::ProofOfWork,
            miner_confirmation_window: 144,
            rule_change_activation_threshold: 108,
            deployments: vec![
                Bip9Deployment::new("testdummy", 28, 0, NO_TIMEOUT),
                Bip9Deployment::new("csv", 0, 0, NO_TIMEOUT),
                Bip9Deployment::new("segwit", 1, ALWAYS_ACTIVE, NO_TIMEOUT),
            ],
            buried: BuriedDeployments {
                bip16: 0,
                bip34: 0,
                bip65: 0,
                bip66: 0,
            },
            coinbase_maturity: 100,
            premine_height: 0,
            premine_reward: 0,
            initial_subsidy: 50 * COIN,
            subsidy_halving_interval: 150,
            proof_of_stake_reward: 0,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
            checkpoints: BTreeMap::new(),
        }
    }

    /// Proof-of-stake network with a premine and a fixed stake reward.
    pub fn proof_of_stake() -> Self {
        Self {
            name: "pos".to_string(),
            kind: ConsensusKind::ProofOfStake,
            coinbase_maturity: 50,
            premine_height: 2,
            premine_reward: 1_000_000 * COIN,
            initial_subsidy: 4 * COIN,
            subsidy_halving_interval: 0,
            proof_of_stake_reward: COIN,
            ..Self::regtest()
        }
    }

    /// Proof-of-authority network: no subsidy outside the premine.
    pub fn proof_of_authority() -> Self {
        Self {
            name: "poa".to_string(),
            kind: ConsensusKind::ProofOfAuthority,
            coinbase_maturity: 10,
            premine_height: 2,
            premine_reward: 2_000_000 * COIN,
            initial_subsidy: 0,
            subsidy_halving_interval: 0,
            ..Self::regtest()
        }
    }

    /// Signalling blocks needed for `deployment` within one window.
    pub fn threshold_for(&self, deployment: usize) -> u32 {
        self.deployments
            .get(deployment)
            .and_then(|d| d.threshold)
            .unwrap_or(self.rule_change_activation_threshold)
    }

    /// Basic sanity checks on a parameter set.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.miner_confirmation_window == 0 {
            bail!("miner_confirmation_window must be positive");
        }
        if self.rule_change_activation_threshold > self.miner_confirmation_window {
            bail!(
                "activation threshold {} exceeds window {}",
                self.rule_change_activation_threshold,
                self.miner_confirmation_window
            );
        }
        let mut seen = 0u32;
        for deployment in &self.deployments {
            if deployment.bit >= VERSIONBITS_NUM_BITS {
                bail!("deployment {} uses reserved bit {}", deployment.name, deployment.bit);
            }
            if seen & (1 << deployment.bit) != 0 {
                bail!("deployment {} reuses bit {}", deployment.name, deployment.bit);
            }
            seen |= 1 << deployment.bit;
        }
        for (name, reward) in [
            ("premine_reward", self.premine_reward),
            ("initial_subsidy", self.initial_subsidy),
            ("proof_of_stake_reward", self.proof_of_stake_reward),
        ] {
            if !(0..=MAX_MONEY).contains(&reward) {
                bail!("{} {} is outside 0..={}", name, reward, MAX_MONEY);
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let params: Self = serde_json::from_str(json).context("parsing consensus parameters")?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading consensus parameters from {}", path.display()))?;
        Self::from_json_str(&json)
    }
}

/// Node-level consensus settings, as opposed to network parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSettings {
    pub use_checkpoints: bool,
    /// Blocks at or below this hash skip script verification.
    #[serde(default)]
    pub assume_valid: Option<Hash>,
    /// Minimum relay fee per 1000 bytes.
    pub min_relay_fee_per_kb: Amount,
    /// Maximum number of pool transactions.
    pub max_mempool_transactions: usize,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            use_checkpoints: true,
            assume_valid: None,
            min_relay_fee_per_kb: 1000,
            max_mempool_transactions: 50_000,
        }
    }
}
