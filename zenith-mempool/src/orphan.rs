//! The orphan pool: transactions whose inputs are not yet known.
//!
//! Admission routes `missing-input` results here; when a parent arrives
//! (in the pool or in a block), the unlocked orphans re-enter the
//! admission pipeline. The pool is bounded by count with random eviction,
//! so a flood of orphans cannot pin memory.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use rand::seq::IteratorRandom;
use tracing::{debug, trace};

use zenith_chain::{
    parameters::DEFAULT_MAX_ORPHAN_TRANSACTIONS,
    transaction::{self, Transaction},
};

/// One waiting orphan and the peer that sent it.
#[derive(Clone, Debug)]
pub struct OrphanEntry {
    pub tx: Arc<Transaction>,
    pub from_peer: Option<SocketAddr>,
}

/// The bounded orphan store.
pub struct OrphanPool {
    orphans: HashMap<transaction::Hash, OrphanEntry>,
    /// parent txid → orphans waiting on it.
    by_parent: HashMap<transaction::Hash, HashSet<transaction::Hash>>,
    max_orphans: usize,
}

impl Default for OrphanPool {
    fn default() -> Self {
        OrphanPool::new(DEFAULT_MAX_ORPHAN_TRANSACTIONS)
    }
}

impl OrphanPool {
    pub fn new(max_orphans: usize) -> OrphanPool {
        OrphanPool {
            orphans: HashMap::new(),
            by_parent: HashMap::new(),
            max_orphans,
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, hash: &transaction::Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Add an orphan, evicting a random entry if the pool is full.
    /// Returns `false` if the orphan was already present.
    pub fn add(&mut self, tx: Arc<Transaction>, from_peer: Option<SocketAddr>) -> bool {
        let hash = tx.hash();
        if self.orphans.contains_key(&hash) {
            return false;
        }

        while self.orphans.len() >= self.max_orphans {
            let victim = self
                .orphans
                .keys()
                .copied()
                .choose(&mut rand::thread_rng())
                .expect("pool is non-empty while over its bound");
            debug!(%victim, "orphan pool full, evicting at random");
            self.erase(&victim);
        }

        for outpoint in tx.spent_outpoints() {
            self.by_parent.entry(outpoint.hash).or_default().insert(hash);
        }
        trace!(%hash, "stored orphan");
        self.orphans.insert(hash, OrphanEntry { tx, from_peer });
        metrics::gauge!("mempool.orphan.count", self.orphans.len() as f64);
        true
    }

    /// Remove one orphan.
    pub fn erase(&mut self, hash: &transaction::Hash) -> Option<OrphanEntry> {
        let entry = self.orphans.remove(hash)?;
        for outpoint in entry.tx.spent_outpoints() {
            if let Some(waiting) = self.by_parent.get_mut(&outpoint.hash) {
                waiting.remove(hash);
                if waiting.is_empty() {
                    self.by_parent.remove(&outpoint.hash);
                }
            }
        }
        Some(entry)
    }

    /// Take every orphan waiting on `parent`, for re-admission.
    pub fn take_children_of(&mut self, parent: &transaction::Hash) -> Vec<OrphanEntry> {
        let children: Vec<transaction::Hash> = self
            .by_parent
            .get(parent)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        children
            .iter()
            .filter_map(|child| self.erase(child))
            .collect()
    }

    /// Drop every orphan received from `peer`.
    pub fn erase_for_peer(&mut self, peer: SocketAddr) -> usize {
        let stale: Vec<transaction::Hash> = self
            .orphans
            .iter()
            .filter(|(_, entry)| entry.from_peer == Some(peer))
            .map(|(hash, _)| *hash)
            .collect();
        let count = stale.len();
        for hash in stale {
            self.erase(&hash);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use zenith_chain::transaction::LockTime;
    use zenith_chain::transparent::{Input, OutPoint, Output, Script};

    fn orphan_spending(parent: transaction::Hash, salt: u8) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: parent,
                    index: 0,
                },
                unlock_script: Script(vec![salt]),
                sequence: 0,
            }],
            vec![Output {
                value: 1i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        ))
    }

    #[test]
    fn children_are_released_by_parent() {
        let mut pool = OrphanPool::new(10);
        let parent = transaction::Hash([1; 32]);
        let a = orphan_spending(parent, 1);
        let b = orphan_spending(parent, 2);
        pool.add(a.clone(), None);
        pool.add(b.clone(), None);

        let released = pool.take_children_of(&parent);
        assert_eq!(released.len(), 2);
        assert!(pool.is_empty());
        assert!(pool.take_children_of(&parent).is_empty());
    }

    #[test]
    fn bound_is_enforced_by_random_eviction() {
        let mut pool = OrphanPool::new(5);
        for salt in 0..20u8 {
            let parent = transaction::Hash([salt; 32]);
            pool.add(orphan_spending(parent, salt), None);
        }
        assert!(pool.len() <= 5);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut pool = OrphanPool::new(5);
        let tx = orphan_spending(transaction::Hash([1; 32]), 1);
        assert!(pool.add(tx.clone(), None));
        assert!(!pool.add(tx, None));
    }
}
