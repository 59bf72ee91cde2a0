//! Consensus parameters and protocol constants.

mod network;

pub use network::{Network, NetworkParameters};

use crate::block;

/// The previous block hash for the genesis block.
///
/// All known networks use the `null` value for the parent of the genesis
/// block.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

/// The depth at which coinbase outputs become spendable.
pub const COINBASE_MATURITY: u32 = 100;

/// Fake chain height used for coins created by unconfirmed transactions.
///
/// The mempool coin-view overlay reports this height for coins that only
/// exist in the mempool; it is above any reachable chain height.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum number of signature-checking operations in a block.
pub const MAX_BLOCK_SIGOPS: u64 = (MAX_BLOCK_SIZE as u64) / 50;

/// Maximum number of sigops a standard transaction may carry.
pub const MAX_STANDARD_TX_SIGOPS: u64 = MAX_BLOCK_SIGOPS / 5;

/// The maximum size of a standard transaction, in bytes.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// Default minimum relay fee, in zatoshi per 1000 bytes.
pub const DEFAULT_MIN_RELAY_TX_FEE: u64 = 100;

/// Default bound on the number of orphan transactions kept in memory.
pub const DEFAULT_MAX_ORPHAN_TRANSACTIONS: usize = 100;

/// Block files are append-only segments of at most this size. 128 MiB
pub const MAX_BLOCKFILE_SIZE: u64 = 0x800_0000;

/// Durability lag cap for the block index and chain state, in seconds.
pub const DATABASE_WRITE_INTERVAL: u64 = 60 * 60;

/// Durability lag cap for the coin state, in seconds.
pub const DATABASE_FLUSH_INTERVAL: u64 = 24 * 60 * 60;

/// Seconds of no download progress before a peer is considered stalling.
pub const BLOCK_STALLING_TIMEOUT: u64 = 2;

/// The replay-protection window: `OP_CHECKBLOCKATHEIGHT` references older
/// than this many blocks are accepted without checking the hash suffix.
pub const CBH_DELTA_HEIGHT: u32 = 52_596;

/// A tip older than this (in seconds) keeps the node in initial block
/// download.
pub const MAX_TIP_AGE: i64 = 24 * 60 * 60;

/// Header-over-tip gap beyond which the node is in initial block download.
pub const IBD_HEADER_GAP: u32 = 24 * 6;

/// Per-sidechain bound on unconfirmed ceased-sidechain-withdrawal inputs.
pub const SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL: usize = 5;

/// The smallest withdrawal epoch length a ceasing sidechain may declare.
pub const SC_MIN_WITHDRAWAL_EPOCH_LENGTH: u32 = 2;

/// The largest withdrawal epoch length a ceasing sidechain may declare.
pub const SC_MAX_WITHDRAWAL_EPOCH_LENGTH: u32 = 4032;
