//! Undo records: everything needed to disconnect a block.
//!
//! The undo for a block snapshots every coin record and sidechain record
//! the block touches, *before* the touch. Disconnecting restores the
//! snapshots and reverses the event-schedule edits. Snapshots are simpler
//! than per-field deltas and make the reorg round-trip property easy to
//! audit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use zenith_chain::{
    block,
    sidechain::{FieldElement, Scid},
    transaction::{self, Anchor, Nullifier},
};

use crate::coins::Coin;
use crate::sidechain::SidechainRecord;

/// The undo record of one connected block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockUndo {
    /// Coin records as they were before this block, keyed by txid. `None`
    /// means the record did not exist (it was created by this block).
    pub coins_before: HashMap<transaction::Hash, Option<Coin>>,
    /// Sidechain records as they were before this block.
    pub sidechains_before: HashMap<Scid, Option<SidechainRecord>>,
    /// Shielded nullifiers this block revealed.
    pub nullifiers_added: Vec<Nullifier>,
    /// Anchors this block introduced.
    pub anchors_added: Vec<Anchor>,
    /// csw nullifiers this block registered, per scid.
    pub csw_nullifiers_added: Vec<(Scid, FieldElement)>,
    /// Cease events this block scheduled.
    pub events_added: Vec<(block::Height, Scid)>,
    /// Cease events this block cancelled (certificate reschedules).
    pub events_removed: Vec<(block::Height, Scid)>,
    /// The cumulative sidechain commitment this block produced.
    pub cum_sc_commitment: Option<FieldElement>,
}

impl BlockUndo {
    /// Record the pre-state of a coin, keeping the earliest snapshot if the
    /// block touches the same record twice.
    pub fn snapshot_coin(&mut self, txid: transaction::Hash, before: Option<Coin>) {
        self.coins_before.entry(txid).or_insert(before);
    }

    /// Record the pre-state of a sidechain, keeping the earliest snapshot.
    pub fn snapshot_sidechain(&mut self, scid: Scid, before: Option<SidechainRecord>) {
        self.sidechains_before.entry(scid).or_insert(before);
    }

    pub fn is_empty(&self) -> bool {
        self.coins_before.is_empty()
            && self.sidechains_before.is_empty()
            && self.nullifiers_added.is_empty()
            && self.anchors_added.is_empty()
            && self.csw_nullifiers_added.is_empty()
            && self.events_added.is_empty()
            && self.events_removed.is_empty()
    }
}
