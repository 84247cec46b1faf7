//! Consensus constants shared by every network

/// Base units per coin
pub const COIN: i64 = 100_000_000;

/// Maximum money supply in base units
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Maximum serialized block size
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum transaction size
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Coinbase script length bounds
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Number of previous headers used for median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Lock time threshold: lock times below this are block heights
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for a final input
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// BIP68: relative lock time is ignored when this bit is set
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// BIP68: relative lock time is time based when this bit is set
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// BIP68: mask extracting the relative lock time value
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// BIP68: time based relative locks are in units of 512 seconds
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// BIP9: top bits a signalling version must carry
pub const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;

/// BIP9: mask for the top bits
pub const VERSIONBITS_TOP_MASK: i32 = 0xE000_0000_u32 as i32;

/// BIP9: number of usable signalling bits
pub const VERSIONBITS_NUM_BITS: u8 = 29;

/// Deployment start time meaning "active from genesis"
pub const ALWAYS_ACTIVE: i64 = -1;

/// Deployment start time meaning "never activates"
pub const NEVER_ACTIVE: i64 = -2;

/// Deployment timeout meaning "no timeout"
pub const NO_TIMEOUT: i64 = i64::MAX;

/// Maximum seconds a header may be ahead of validation time
pub const MAX_FUTURE_BLOCK_TIME: u64 = 2 * 60 * 60;
