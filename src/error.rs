//! Error types for consensus validation

use thiserror::Error;

use crate::types::OutPoint;

/// How a caller should treat a rejected candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Never valid as-is; the sender may be penalized.
    Permanent,
    /// Provisional; the candidate may become valid later (orphan-eligible).
    Temporary,
    /// The caller passed a missing network, chain, header or transaction.
    InvalidArgument,
    /// A collaborator failed; says nothing about the candidate.
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("coin view error: {0}")]
    CoinView(String),

    // Header rules
    #[error("block version {version} rejected at height {height}")]
    BadVersion { version: i32, height: u32 },

    #[error("block time is not above the median time past")]
    TimeTooOld,

    #[error("block time is too far in the future")]
    TimeTooNew,

    #[error("block hash does not match checkpoint at height {0}")]
    CheckpointMismatch(u32),

    // Integrity rules
    #[error("merkle root mismatch")]
    BadMerkleRoot,

    #[error("first transaction is not a coinbase")]
    BadCoinbaseMissing,

    #[error("more than one coinbase")]
    BadMultipleCoinbase,

    #[error("coinstake misplaced or duplicated")]
    BadMultipleCoinstake,

    #[error("proof-of-stake block carries a non-empty coinbase")]
    BadStakeBlockCoinbase,

    #[error("block size out of range")]
    BadBlockLength,

    // Transaction structure
    #[error("transaction has no inputs")]
    BadTransactionNoInput,

    #[error("transaction has no outputs")]
    BadTransactionNoOutput,

    #[error("transaction is oversized")]
    BadTransactionOversize,

    #[error("transaction output value is negative")]
    BadTransactionNegativeOutput,

    #[error("transaction output value is too large")]
    BadTransactionTooLargeOutput,

    #[error("transaction total output value is too large")]
    BadTransactionTooLargeTotalOutput,

    #[error("transaction has duplicate inputs")]
    BadTransactionDuplicateInputs,

    #[error("coinbase script size out of range")]
    BadCoinbaseSize,

    #[error("non-coinbase transaction spends a null outpoint")]
    BadTransactionNullPrevout,

    #[error("transaction is not final")]
    BadTransactionNonFinal,

    #[error("coinbase does not start with the block height")]
    BadCoinbaseHeight,

    // Coin view rules
    #[error("transaction overwrites an unspent output (BIP30)")]
    BadTransactionBip30,

    #[error("missing or spent inputs")]
    BadTransactionMissingInput,

    #[error("tried to spend {coin_height} block reward at height {spend_height}")]
    BadTransactionPrematureCoinbaseSpending { coin_height: u32, spend_height: u32 },

    #[error("input values out of range")]
    BadTransactionInputValueOutOfRange,

    #[error("value in is below value out")]
    BadTransactionInBelowOut,

    #[error("script verification failed for input {input} of {txid:02x?}")]
    BadTransactionScriptError { txid: [u8; 32], input: usize },

    #[error("coinbase pays more than fees plus subsidy ({actual} > {limit})")]
    BadCoinbaseAmount { actual: i64, limit: i64 },

    #[error("coinstake pays more than fees plus stake reward ({actual} > {limit})")]
    BadCoinstakeAmount { actual: i64, limit: i64 },

    // Mempool rules
    #[error("coinbase or coinstake is not accepted as a loose transaction")]
    TxCoinbase,

    #[error("transaction is not final at the next block")]
    TxNonFinal,

    #[error("transaction already known")]
    TxAlreadyKnown,

    #[error("transaction conflicts with a pool transaction on {0:?}")]
    MempoolConflict(OutPoint),

    #[error("missing or spent inputs")]
    MissingOrSpentInputs,

    #[error("transaction is not BIP68 final")]
    NonBip68Final,

    #[error("inputs are below outputs")]
    BadInputsBelowOut,

    #[error("fee {fee} below minimum relay fee {required}")]
    MinRelayFeeNotMet { fee: i64, required: i64 },

    #[error("mempool is full")]
    MempoolFull,
}

impl ConsensusError {
    /// Stable reject code, the string peers see.
    pub fn code(&self) -> &'static str {
        match self {
            ConsensusError::InvalidArgument(_) => "invalid-argument",
            ConsensusError::CoinView(_) => "coinview-error",
            ConsensusError::BadVersion { .. } => "bad-version",
            ConsensusError::TimeTooOld => "time-too-old",
            ConsensusError::TimeTooNew => "time-too-new",
            ConsensusError::CheckpointMismatch(_) => "checkpoint-mismatch",
            ConsensusError::BadMerkleRoot => "bad-txnmrklroot",
            ConsensusError::BadCoinbaseMissing => "bad-cb-missing",
            ConsensusError::BadMultipleCoinbase => "bad-cb-multiple",
            ConsensusError::BadMultipleCoinstake => "bad-cs-multiple",
            ConsensusError::BadStakeBlockCoinbase => "bad-cb-not-empty",
            ConsensusError::BadBlockLength => "bad-blk-length",
            ConsensusError::BadTransactionNoInput => "bad-txns-vin-empty",
            ConsensusError::BadTransactionNoOutput => "bad-txns-vout-empty",
            ConsensusError::BadTransactionOversize => "bad-txns-oversize",
            ConsensusError::BadTransactionNegativeOutput => "bad-txns-vout-negative",
            ConsensusError::BadTransactionTooLargeOutput => "bad-txns-vout-toolarge",
            ConsensusError::BadTransactionTooLargeTotalOutput => "bad-txns-txouttotal-toolarge",
            ConsensusError::BadTransactionDuplicateInputs => "bad-txns-inputs-duplicate",
            ConsensusError::BadCoinbaseSize => "bad-cb-length",
            ConsensusError::BadTransactionNullPrevout => "bad-txns-prevout-null",
            ConsensusError::BadTransactionNonFinal => "bad-txns-nonfinal",
            ConsensusError::BadCoinbaseHeight => "bad-cb-height",
            ConsensusError::BadTransactionBip30 => "bad-txns-BIP30",
            ConsensusError::BadTransactionMissingInput => "bad-txns-inputs-missingorspent",
            ConsensusError::BadTransactionPrematureCoinbaseSpending { .. } => {
                "bad-txns-premature-spend-of-coinbase"
            }
            ConsensusError::BadTransactionInputValueOutOfRange => "bad-txns-inputvalues-outofrange",
            ConsensusError::BadTransactionInBelowOut => "bad-txns-in-belowout",
            ConsensusError::BadTransactionScriptError { .. } => "mandatory-script-verify-flag-failed",
            ConsensusError::BadCoinbaseAmount { .. } => "bad-cb-amount",
            ConsensusError::BadCoinstakeAmount { .. } => "bad-cs-amount",
            ConsensusError::TxCoinbase => "coinbase",
            ConsensusError::TxNonFinal => "non-final",
            ConsensusError::TxAlreadyKnown => "txn-already-known",
            ConsensusError::MempoolConflict(_) => "txn-mempool-conflict",
            ConsensusError::MissingOrSpentInputs => "missing-inputs",
            ConsensusError::NonBip68Final => "non-BIP68-final",
            ConsensusError::BadInputsBelowOut => "bad-txns-in-belowout",
            ConsensusError::MinRelayFeeNotMet { .. } => "min relay fee not met",
            ConsensusError::MempoolFull => "mempool full",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ConsensusError::InvalidArgument(_) => ErrorClass::InvalidArgument,
            ConsensusError::CoinView(_) => ErrorClass::Internal,
            ConsensusError::MissingOrSpentInputs
            | ConsensusError::TimeTooNew
            | ConsensusError::MempoolFull => ErrorClass::Temporary,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether the candidate may be retried later, e.g. held as an orphan.
    pub fn is_temporary(&self) -> bool {
        self.class() == ErrorClass::Temporary
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
