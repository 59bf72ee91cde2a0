//! The block index: every header this node has ever considered, as an
//! arena of nodes linked by stable indices.
//!
//! Raw parent pointers are replaced by arena ids; traversals follow
//! indices, and the skip pointer gives O(log n) ancestor queries.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use zenith_chain::{
    block::{self, Header},
    sidechain::FieldElement,
    transaction,
    work::difficulty::Work,
};

/// A stable handle into the arena.
pub type NodeId = usize;

bitflags! {
    /// Validation progress and failure bits for an indexed block.
    #[derive(Serialize, Deserialize)]
    pub struct BlockStatus: u8 {
        /// The header passed context-free and contextual header checks.
        const VALID_HEADER = 0b0000_0001;
        /// The block body parsed and passed context-free checks.
        const VALID_TRANSACTIONS = 0b0000_0010;
        /// The block connected successfully on some chain.
        const VALID_CHAIN = 0b0000_0100;
        /// The block failed validation and is banned from reconsideration.
        const FAILED = 0b0001_0000;
        /// A descendant of a failed block.
        const FAILED_CHILD = 0b0010_0000;
    }
}

/// Where a block (or its undo data) lives inside the append-only file
/// segments.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiskPosition {
    /// The segment file number.
    pub file: u32,
    /// Byte offset of the record inside the segment.
    pub offset: u64,
}

/// One indexed block.
#[derive(Clone, Debug)]
pub struct BlockIndexNode {
    pub hash: block::Hash,
    pub header: Header,
    pub height: block::Height,
    pub parent: Option<NodeId>,
    /// An ancestor roughly `height - height/2` back, giving logarithmic
    /// ancestor walks.
    pub skip: Option<NodeId>,
    /// Total work of the chain ending in this block.
    pub chain_work: Work,
    pub status: BlockStatus,
    pub data_pos: Option<DiskPosition>,
    pub undo_pos: Option<DiskPosition>,
    /// Cumulative sidechain-commitment tree hash up to this block, filled
    /// in at connect time.
    pub cum_sc_commitment: Option<FieldElement>,
}

fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}

/// Determine the skip height used by the skip-list pointer.
///
/// Odd heights step back twice and re-add one, so that consecutive skip
/// targets interleave and any ancestor is reachable in O(log n) hops.
fn skip_height(height: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// The arena of block index nodes plus the hash lookup table, the
/// fork-tips set, and the cumulative-commitment → height map consumed by
/// certificate checks.
#[derive(Default)]
pub struct BlockIndex {
    nodes: Vec<BlockIndexNode>,
    by_hash: HashMap<block::Hash, NodeId>,
    /// Nodes with no indexed children.
    tips: HashSet<NodeId>,
    /// legacy-hash of a cumulative sidechain commitment → the height it was
    /// produced at. Used to resolve certificate referenced heights.
    cum_height: HashMap<transaction::Hash, block::Height>,
}

impl BlockIndex {
    pub fn new() -> BlockIndex {
        BlockIndex::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &BlockIndexNode {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut BlockIndexNode {
        &mut self.nodes[id]
    }

    pub fn by_hash(&self, hash: &block::Hash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &block::Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// The current fork tips.
    pub fn tips(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tips.iter().copied()
    }

    /// Insert a header whose parent is already indexed (or which is the
    /// genesis block). Returns the node id; re-inserting an indexed header
    /// returns the existing id.
    pub fn insert(&mut self, header: Header) -> Result<NodeId, BlockIndexError> {
        let hash = header.hash();
        if let Some(&id) = self.by_hash.get(&hash) {
            return Ok(id);
        }

        let (parent, height, parent_work) = if header.previous_block_hash
            == zenith_chain::parameters::GENESIS_PREVIOUS_BLOCK_HASH
        {
            (None, block::Height(0), Work::default())
        } else {
            let parent_id = self
                .by_hash
                .get(&header.previous_block_hash)
                .copied()
                .ok_or(BlockIndexError::OrphanHeader(hash))?;
            let parent = &self.nodes[parent_id];
            let height = (parent.height + 1).ok_or(BlockIndexError::HeightOverflow)?;
            (Some(parent_id), height, parent.chain_work)
        };

        let own_work = header
            .difficulty_threshold
            .to_work()
            .ok_or(BlockIndexError::InvalidDifficulty(hash))?;

        let id = self.nodes.len();
        let skip = parent.and_then(|_| self.ancestor_of(id, parent, block::Height(skip_height(height.0))));

        self.nodes.push(BlockIndexNode {
            hash,
            header,
            height,
            parent,
            skip,
            chain_work: parent_work + own_work,
            status: BlockStatus::VALID_HEADER,
            data_pos: None,
            undo_pos: None,
            cum_sc_commitment: None,
        });
        self.by_hash.insert(hash, id);
        if let Some(parent_id) = parent {
            self.tips.remove(&parent_id);
        }
        self.tips.insert(id);
        Ok(id)
    }

    // ancestor walk used during insertion, before the node exists
    fn ancestor_of(
        &self,
        _new_id: NodeId,
        parent: Option<NodeId>,
        target: block::Height,
    ) -> Option<NodeId> {
        let parent = parent?;
        self.ancestor(parent, target)
    }

    /// The ancestor of `id` at `target` height, following skip pointers.
    pub fn ancestor(&self, id: NodeId, target: block::Height) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = &self.nodes[current];
            if node.height == target {
                return Some(current);
            }
            if node.height < target {
                return None;
            }
            // prefer the skip pointer when it does not overshoot
            current = match node.skip {
                Some(skip) if self.nodes[skip].height >= target => skip,
                _ => node.parent?,
            };
        }
    }

    /// The lowest common ancestor of two indexed blocks.
    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height = std::cmp::min(self.nodes[a].height, self.nodes[b].height);
        let mut a = self.ancestor(a, height)?;
        let mut b = self.ancestor(b, height)?;
        while a != b {
            a = self.nodes[a].parent?;
            b = self.nodes[b].parent?;
        }
        Some(a)
    }

    /// Record the cumulative commitment produced at `height`.
    pub fn record_cum_commitment(&mut self, commitment: FieldElement, height: block::Height) {
        self.cum_height.insert(commitment.legacy_hash(), height);
    }

    /// Drop the cumulative-commitment entry for a disconnected block.
    pub fn forget_cum_commitment(&mut self, commitment: &FieldElement) {
        self.cum_height.remove(&commitment.legacy_hash());
    }

    /// Resolve a certificate's end-epoch cumulative root to a mainchain
    /// height.
    pub fn height_for_cum_commitment(&self, commitment: &FieldElement) -> Option<block::Height> {
        self.cum_height.get(&commitment.legacy_hash()).copied()
    }

    /// Mark a block failed, and taint every indexed descendant.
    pub fn mark_failed(&mut self, id: NodeId) {
        self.nodes[id].status.insert(BlockStatus::FAILED);
        // descendants always have larger arena ids than their ancestors
        for child in id + 1..self.nodes.len() {
            if let Some(parent) = self.nodes[child].parent {
                if self.nodes[parent]
                    .status
                    .intersects(BlockStatus::FAILED | BlockStatus::FAILED_CHILD)
                {
                    self.nodes[child].status.insert(BlockStatus::FAILED_CHILD);
                }
            }
        }
    }

    /// Clear failure bits on a block and its descendants, allowing
    /// reconsideration.
    pub fn clear_failure(&mut self, id: NodeId) {
        self.nodes[id]
            .status
            .remove(BlockStatus::FAILED | BlockStatus::FAILED_CHILD);
        for child in id + 1..self.nodes.len() {
            if let Some(parent) = self.nodes[child].parent {
                if !self.nodes[parent]
                    .status
                    .intersects(BlockStatus::FAILED | BlockStatus::FAILED_CHILD)
                {
                    self.nodes[child].status.remove(BlockStatus::FAILED_CHILD);
                }
            }
        }
    }

    /// The usable tip with the most chain work: neither failed nor
    /// descended from a failed block.
    pub fn best_candidate_tip(&self) -> Option<NodeId> {
        self.tips
            .iter()
            .copied()
            .filter(|&id| {
                !self.nodes[id]
                    .status
                    .intersects(BlockStatus::FAILED | BlockStatus::FAILED_CHILD)
            })
            .max_by_key(|&id| (self.nodes[id].chain_work, std::cmp::Reverse(id)))
    }
}

/// Errors raised by block index mutation.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BlockIndexError {
    #[error("header {0:?} has no indexed parent")]
    OrphanHeader(block::Hash),
    #[error("header declares an invalid difficulty")]
    InvalidDifficulty(block::Hash),
    #[error("block height overflowed")]
    HeightOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use zenith_chain::block::EquihashSolution;
    use zenith_chain::work::difficulty::CompactDifficulty;

    fn header(parent: block::Hash, salt: u8) -> Header {
        Header::new(
            3,
            parent,
            zenith_chain::block::merkle::Root([salt; 32]),
            Utc.timestamp(1_600_000_000 + salt as i64, 0),
            CompactDifficulty(0x1d00ffff),
            [salt; 32],
            EquihashSolution(vec![salt]),
        )
    }

    fn chain(index: &mut BlockIndex, length: usize) -> Vec<NodeId> {
        let mut parent = zenith_chain::parameters::GENESIS_PREVIOUS_BLOCK_HASH;
        let mut ids = Vec::new();
        for i in 0..length {
            let header = header(parent, i as u8);
            parent = header.hash();
            ids.push(index.insert(header).unwrap());
        }
        ids
    }

    #[test]
    fn heights_and_parents_link_up() {
        let mut index = BlockIndex::new();
        let ids = chain(&mut index, 5);
        for (expected_height, &id) in ids.iter().enumerate() {
            assert_eq!(index.get(id).height, block::Height(expected_height as u32));
        }
        assert_eq!(index.get(ids[4]).parent, Some(ids[3]));
    }

    #[test]
    fn orphan_headers_are_rejected() {
        let mut index = BlockIndex::new();
        let orphan = header(block::Hash([0xEE; 32]), 1);
        assert!(matches!(
            index.insert(orphan),
            Err(BlockIndexError::OrphanHeader(_))
        ));
    }

    #[test]
    fn ancestor_walks_and_lca() {
        let mut index = BlockIndex::new();
        let trunk = chain(&mut index, 10);

        // fork off trunk[4]
        let fork_parent = index.get(trunk[4]).hash;
        let fork_header = header(fork_parent, 0xAB);
        let fork = index.insert(fork_header).unwrap();

        assert_eq!(index.ancestor(trunk[9], block::Height(3)), Some(trunk[3]));
        assert_eq!(
            index.lowest_common_ancestor(trunk[9], fork),
            Some(trunk[4])
        );
    }

    #[test]
    fn tips_track_forks() {
        let mut index = BlockIndex::new();
        let trunk = chain(&mut index, 4);
        let fork_header = header(index.get(trunk[1]).hash, 0xCD);
        let fork = index.insert(fork_header).unwrap();

        let tips: HashSet<NodeId> = index.tips().collect();
        assert_eq!(tips, vec![trunk[3], fork].into_iter().collect());
    }

    #[test]
    fn failure_taints_descendants() {
        let mut index = BlockIndex::new();
        let trunk = chain(&mut index, 6);
        index.mark_failed(trunk[2]);
        assert!(index.get(trunk[2]).status.contains(BlockStatus::FAILED));
        assert!(index
            .get(trunk[5])
            .status
            .contains(BlockStatus::FAILED_CHILD));

        assert_eq!(index.best_candidate_tip(), None);

        index.clear_failure(trunk[2]);
        assert_eq!(index.best_candidate_tip(), Some(trunk[5]));
    }
}
