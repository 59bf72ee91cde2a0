//! An in-memory base layer, used by tests and by ephemeral regtest runs
//! that never touch disk.

use std::collections::{BTreeMap, HashMap, HashSet};

use zenith_chain::{
    block,
    sidechain::{FieldElement, Scid},
    transaction::{self, Anchor, Nullifier},
};

use crate::coins::{Coin, CoinView, StateDelta, WriteableCoinView};
use crate::sidechain::SidechainRecord;
use crate::BoxError;

/// A `HashMap`-backed coin view with the same write contract as the sled
/// store.
#[derive(Default)]
pub struct MemoryState {
    coins: HashMap<transaction::Hash, Coin>,
    nullifiers: HashSet<Nullifier>,
    anchors: HashSet<Anchor>,
    sidechains: HashMap<Scid, SidechainRecord>,
    sidechain_events: BTreeMap<block::Height, HashSet<Scid>>,
    csw_nullifiers: HashSet<(Scid, FieldElement)>,
    best_block: Option<block::Hash>,
}

impl CoinView for MemoryState {
    fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coin>, BoxError> {
        Ok(self.coins.get(txid).cloned())
    }

    fn nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool, BoxError> {
        Ok(self.nullifiers.contains(nullifier))
    }

    fn have_anchor(&self, anchor: &Anchor) -> Result<bool, BoxError> {
        Ok(self.anchors.contains(anchor))
    }

    fn sidechain(&self, scid: &Scid) -> Result<Option<SidechainRecord>, BoxError> {
        Ok(self.sidechains.get(scid).cloned())
    }

    fn have_csw_nullifier(
        &self,
        scid: &Scid,
        nullifier: &FieldElement,
    ) -> Result<bool, BoxError> {
        Ok(self.csw_nullifiers.contains(&(*scid, *nullifier)))
    }

    fn sidechain_events_at(&self, height: block::Height) -> Result<Vec<Scid>, BoxError> {
        Ok(self
            .sidechain_events
            .get(&height)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn best_block(&self) -> Result<Option<block::Hash>, BoxError> {
        Ok(self.best_block)
    }
}

impl WriteableCoinView for MemoryState {
    fn batch_write(&mut self, delta: StateDelta) -> Result<(), BoxError> {
        for (txid, coin) in delta.coins {
            match coin {
                Some(coin) => {
                    self.coins.insert(txid, coin);
                }
                None => {
                    self.coins.remove(&txid);
                }
            }
        }
        for (nullifier, spent) in delta.nullifiers {
            if spent {
                self.nullifiers.insert(nullifier);
            } else {
                self.nullifiers.remove(&nullifier);
            }
        }
        for (anchor, present) in delta.anchors {
            if present {
                self.anchors.insert(anchor);
            } else {
                self.anchors.remove(&anchor);
            }
        }
        for (scid, record) in delta.sidechains {
            match record {
                Some(record) => {
                    self.sidechains.insert(scid, record);
                }
                None => {
                    self.sidechains.remove(&scid);
                }
            }
        }
        for ((height, scid), present) in delta.sidechain_events {
            let entry = self.sidechain_events.entry(height).or_default();
            if present {
                entry.insert(scid);
            } else {
                entry.remove(&scid);
            }
        }
        self.sidechain_events.retain(|_, set| !set.is_empty());
        for ((scid, nullifier), present) in delta.csw_nullifiers {
            if present {
                self.csw_nullifiers.insert((scid, nullifier));
            } else {
                self.csw_nullifiers.remove(&(scid, nullifier));
            }
        }
        if let Some(best) = delta.best_block {
            self.best_block = Some(best);
        }
        Ok(())
    }
}
