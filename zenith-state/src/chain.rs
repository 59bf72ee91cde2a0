//! The active chain, the chain-state aggregate, and the
//! initial-block-download latch.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use zenith_chain::{
    block,
    parameters::{NetworkParameters, IBD_HEADER_GAP, MAX_TIP_AGE},
    work::difficulty::Work,
};

use crate::block_index::{BlockIndex, NodeId};
use crate::coins::{CoinsCache, WriteableCoinView};
use crate::undo::BlockUndo;

/// The active chain: node ids by height, genesis first.
#[derive(Default)]
pub struct ActiveChain {
    nodes: Vec<NodeId>,
}

impl ActiveChain {
    pub fn new() -> ActiveChain {
        ActiveChain::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tip(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn tip_height(&self) -> Option<block::Height> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(block::Height(self.nodes.len() as u32 - 1))
        }
    }

    pub fn at(&self, height: block::Height) -> Option<NodeId> {
        self.nodes.get(height.0 as usize).copied()
    }

    pub fn contains(&self, id: NodeId, index: &BlockIndex) -> bool {
        let height = index.get(id).height;
        self.at(height) == Some(id)
    }

    /// Extend the chain by one block; `id` must be the child of the
    /// current tip.
    pub fn push(&mut self, id: NodeId) {
        self.nodes.push(id);
    }

    /// Drop the tip.
    pub fn pop(&mut self) -> Option<NodeId> {
        self.nodes.pop()
    }
}

/// Everything protected by the `cs_main` monitor, gathered into one value
/// and threaded through the validation entry points.
pub struct ChainState<V> {
    pub params: NetworkParameters,
    pub index: BlockIndex,
    pub active: ActiveChain,
    pub coins: CoinsCache<V>,
    /// Undo records of connected blocks, by node id. Kept in memory until
    /// written to the undo segments.
    pub undos: std::collections::HashMap<NodeId, BlockUndo>,
    pub ibd: IbdLatch,
}

impl<V: WriteableCoinView> ChainState<V> {
    pub fn new(params: NetworkParameters, base: V) -> ChainState<V> {
        ChainState {
            params,
            index: BlockIndex::new(),
            active: ActiveChain::new(),
            coins: CoinsCache::new(base),
            undos: std::collections::HashMap::new(),
            ibd: IbdLatch::new(),
        }
    }

    /// The height of the active tip; `None` before genesis connects.
    pub fn tip_height(&self) -> Option<block::Height> {
        self.active.tip_height()
    }

    /// The hash of the active chain's block at `height`.
    pub fn hash_at(&self, height: block::Height) -> Option<block::Hash> {
        self.active.at(height).map(|id| self.index.get(id).hash)
    }

    /// The best-header work seen so far, across all forks.
    pub fn best_header_work(&self) -> Work {
        self.index
            .tips()
            .map(|id| self.index.get(id).chain_work)
            .max()
            .unwrap_or_default()
    }
}

/// State used by the initial-block-download heuristic.
///
/// Once the node leaves IBD it never re-enters it for the remainder of the
/// process; the latch makes the transition one-way.
pub struct IbdLatch {
    latched_out: AtomicBool,
    /// Minimum chain work baked in at release time; below this, we are
    /// certainly still syncing.
    pub minimum_chain_work: Work,
}

impl Default for IbdLatch {
    fn default() -> Self {
        IbdLatch {
            latched_out: AtomicBool::new(false),
            minimum_chain_work: Work(0),
        }
    }
}

impl IbdLatch {
    pub fn new() -> IbdLatch {
        IbdLatch::default()
    }

    /// Evaluate the IBD heuristic.
    ///
    /// We are in IBD if importing or reindexing, if the tip's work is below
    /// the checkpointed minimum, if the best header is far ahead of the
    /// tip, or if the tip is much older than the wall clock. A negative
    /// answer latches.
    #[allow(clippy::too_many_arguments)]
    pub fn is_initial_block_download(
        &self,
        importing_or_reindexing: bool,
        tip_work: Work,
        tip_time: Option<DateTime<Utc>>,
        tip_height: Option<block::Height>,
        best_header_height: Option<block::Height>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.latched_out.load(Ordering::SeqCst) {
            return false;
        }
        if importing_or_reindexing {
            return true;
        }
        if tip_work < self.minimum_chain_work {
            return true;
        }
        if let (Some(tip), Some(best)) = (tip_height, best_header_height) {
            if best.0.saturating_sub(tip.0) > IBD_HEADER_GAP {
                return true;
            }
        }
        match tip_time {
            Some(time) if time < now - Duration::seconds(MAX_TIP_AGE) => return true,
            None => return true,
            _ => {}
        }

        info!("leaving initial block download");
        self.latched_out.store(true, Ordering::SeqCst);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ibd_latch_never_reenters() {
        let latch = IbdLatch::new();
        let now = Utc.timestamp(1_700_000_000, 0);
        let fresh_tip = Some(now - Duration::seconds(60));

        // syncing: far-ahead header keeps us in IBD
        assert!(latch.is_initial_block_download(
            false,
            Work(100),
            fresh_tip,
            Some(block::Height(10)),
            Some(block::Height(1000)),
            now,
        ));

        // caught up: latch out
        assert!(!latch.is_initial_block_download(
            false,
            Work(100),
            fresh_tip,
            Some(block::Height(1000)),
            Some(block::Height(1000)),
            now,
        ));

        // stale conditions no longer matter
        assert!(!latch.is_initial_block_download(
            true,
            Work(0),
            None,
            None,
            Some(block::Height(99_999)),
            now,
        ));
    }

    #[test]
    fn active_chain_push_pop() {
        let mut chain = ActiveChain::new();
        assert_eq!(chain.tip_height(), None);
        chain.push(0);
        chain.push(1);
        assert_eq!(chain.tip_height(), Some(block::Height(1)));
        assert_eq!(chain.pop(), Some(1));
        assert_eq!(chain.tip_height(), Some(block::Height(0)));
    }
}
