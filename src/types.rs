//! Core value types shared by the rule chains

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Monetary amount in base units
pub type Amount = i64;

/// Block height
pub type Height = u32;

/// OutPoint: (transaction hash, output index)
///
/// The derived ordering compares the hash first and the index second, so
/// ordered collections of outpoints iterate identically on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The outpoint referenced by a coinbase input.
    pub fn null() -> Self {
        Self { hash: [0u8; 32], index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub script_pubkey: ByteString,
}

impl TransactionOutput {
    /// Empty marker output (first output of a coinstake).
    pub fn empty() -> Self {
        Self { value: 0, script_pubkey: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Coin: the data behind an unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub value: Amount,
    pub script_pubkey: ByteString,
    pub height: Height,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
}

impl Coin {
    /// Whether the coin is a block reward subject to maturity.
    pub fn is_reward(&self) -> bool {
        self.is_coinbase || self.is_coinstake
    }
}

/// UnspentOutput: an outpoint and its coin, `None` once spent or absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub coin: Option<Coin>,
}

impl UnspentOutput {
    pub fn new(outpoint: OutPoint, coin: Option<Coin>) -> Self {
        Self { outpoint, coin }
    }

    pub fn is_spent(&self) -> bool {
        self.coin.is_none()
    }

    /// Returns the spent form of this output.
    pub fn spent(&self) -> Self {
        Self { outpoint: self.outpoint, coin: None }
    }
}
