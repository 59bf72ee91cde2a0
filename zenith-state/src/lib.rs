//! Chain state for zenith: the layered coin view, the sidechain registry
//! and its state machine, the block index, and the undo machinery that
//! makes connect/disconnect reversible.
//!
//! This crate is mechanism, not policy: it applies and reverts deltas that
//! the consensus crate has already validated. The only rules enforced here
//! are the arithmetic ones that keep the state internally consistent
//! (balances in range, coins not double-created, undo data present).

pub mod block_files;
pub mod block_index;
pub mod chain;
pub mod coins;
pub mod finalized;
pub mod indexes;
pub mod memory;
pub mod notifications;
pub mod sidechain;
pub mod undo;

pub use block_index::{BlockIndex, BlockStatus, DiskPosition, NodeId};
pub use chain::{ActiveChain, ChainState, IbdLatch};
pub use coins::{Coin, CoinOwnership, CoinView, CoinsCache, StateDelta, WriteableCoinView};
pub use finalized::FinalizedState;
pub use memory::MemoryState;
pub use notifications::{BwtState, CertStatusInfo, SyncEvent, SyncSender};
pub use sidechain::{LastCertSummary, SidechainRecord, SidechainState};
pub use undo::BlockUndo;

pub use zenith_chain::amount::{Amount, NonNegative};

/// The generic error carried by state reads: disk failures, corrupt
/// records. These are operational errors, never consensus verdicts.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Identify a block by hash or height.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HashOrHeight {
    Hash(zenith_chain::block::Hash),
    Height(zenith_chain::block::Height),
}

impl From<zenith_chain::block::Hash> for HashOrHeight {
    fn from(hash: zenith_chain::block::Hash) -> Self {
        HashOrHeight::Hash(hash)
    }
}

impl From<zenith_chain::block::Height> for HashOrHeight {
    fn from(height: zenith_chain::block::Height) -> Self {
        HashOrHeight::Height(height)
    }
}

/// Runtime configuration for the state layer.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// The root directory for databases and block files.
    pub cache_dir: std::path::PathBuf,
    /// Soft cap on the in-memory coin cache, in bytes.
    pub db_cache_bytes: usize,
    /// Use a throwaway database that is deleted on drop.
    pub ephemeral: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("zenith"),
            db_cache_bytes: 450 * 1024 * 1024,
            ephemeral: false,
        }
    }
}

impl Config {
    /// The sled configuration for `network`.
    pub fn sled_config(&self, network: zenith_chain::parameters::Network) -> sled::Config {
        let path = self.cache_dir.join(format!("state-{}", network));
        sled::Config::new()
            .path(path)
            .cache_capacity(self.db_cache_bytes as u64)
            .temporary(self.ephemeral)
    }
}
