//! The durable base of the coin view stack, stored in sled.
//!
//! One tree per persistent KV namespace: `chainstate/coins`,
//! `chainstate/sidechains`, `chainstate/sidechain-events`,
//! `chainstate/anchors`, `chainstate/nullifiers`,
//! `chainstate/csw-nullifiers`, `best-block`, and `block-index`. Record
//! values are bincode-encoded serde types; keys are the raw big-endian
//! bytes of the identifying hash (plus a height prefix for event keys), so
//! lexicographic iteration matches the semantic order.

use std::convert::TryInto;

use tracing::trace;

use zenith_chain::{
    block,
    sidechain::{FieldElement, Scid},
    transaction::{self, Anchor, Nullifier},
};

use crate::coins::{Coin, CoinView, StateDelta, WriteableCoinView};
use crate::sidechain::SidechainRecord;
use crate::{BoxError, Config};

/// The finalized chain state.
///
/// All writes go through [`WriteableCoinView::batch_write`], which commits a
/// delta atomically via a sled transaction batch.
pub struct FinalizedState {
    coins: sled::Tree,
    nullifiers: sled::Tree,
    anchors: sled::Tree,
    sidechains: sled::Tree,
    sidechain_events: sled::Tree,
    csw_nullifiers: sled::Tree,
    meta: sled::Tree,
    pub(crate) block_index: sled::Tree,
}

const BEST_BLOCK_KEY: &[u8] = b"best-block";

fn event_key(height: block::Height, scid: &Scid) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&height.0.to_be_bytes());
    key.extend_from_slice(&scid.0);
    key
}

fn csw_key(scid: &Scid, nullifier: &FieldElement) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(&scid.0);
    key.extend_from_slice(&nullifier.0);
    key
}

impl FinalizedState {
    pub fn new(
        config: &Config,
        network: zenith_chain::parameters::Network,
    ) -> Result<Self, BoxError> {
        let db = config.sled_config(network).open()?;
        Ok(Self::from_db(&db)?)
    }

    /// Open every namespace tree on `db`.
    pub fn from_db(db: &sled::Db) -> Result<Self, sled::Error> {
        Ok(FinalizedState {
            coins: db.open_tree(b"chainstate/coins")?,
            nullifiers: db.open_tree(b"chainstate/nullifiers")?,
            anchors: db.open_tree(b"chainstate/anchors")?,
            sidechains: db.open_tree(b"chainstate/sidechains")?,
            sidechain_events: db.open_tree(b"chainstate/sidechain-events")?,
            csw_nullifiers: db.open_tree(b"chainstate/csw-nullifiers")?,
            meta: db.open_tree(b"meta")?,
            block_index: db.open_tree(b"block-index")?,
        })
    }

    /// An ephemeral instance for tests.
    pub fn ephemeral() -> Self {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("ephemeral sled database opens");
        Self::from_db(&db).expect("ephemeral trees open")
    }
}

impl CoinView for FinalizedState {
    fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coin>, BoxError> {
        match self.coins.get(txid.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool, BoxError> {
        Ok(self.nullifiers.contains_key(nullifier.0)?)
    }

    fn have_anchor(&self, anchor: &Anchor) -> Result<bool, BoxError> {
        Ok(self.anchors.contains_key(anchor.0)?)
    }

    fn sidechain(&self, scid: &Scid) -> Result<Option<SidechainRecord>, BoxError> {
        match self.sidechains.get(scid.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn have_csw_nullifier(
        &self,
        scid: &Scid,
        nullifier: &FieldElement,
    ) -> Result<bool, BoxError> {
        Ok(self.csw_nullifiers.contains_key(csw_key(scid, nullifier))?)
    }

    fn sidechain_events_at(&self, height: block::Height) -> Result<Vec<Scid>, BoxError> {
        let prefix = height.0.to_be_bytes();
        let mut scids = Vec::new();
        for entry in self.sidechain_events.scan_prefix(prefix) {
            let (key, _) = entry?;
            let scid_bytes: [u8; 32] = key[4..]
                .try_into()
                .map_err(|_| "corrupt sidechain-event key")?;
            scids.push(Scid(scid_bytes));
        }
        Ok(scids)
    }

    fn best_block(&self) -> Result<Option<block::Hash>, BoxError> {
        match self.meta.get(BEST_BLOCK_KEY)? {
            Some(bytes) => {
                let hash_bytes: [u8; 32] =
                    bytes.as_ref().try_into().map_err(|_| "corrupt best-block")?;
                Ok(Some(block::Hash(hash_bytes)))
            }
            None => Ok(None),
        }
    }
}

impl WriteableCoinView for FinalizedState {
    fn batch_write(&mut self, delta: StateDelta) -> Result<(), BoxError> {
        trace!(
            coins = delta.coins.len(),
            nullifiers = delta.nullifiers.len(),
            sidechains = delta.sidechains.len(),
            "flushing state delta"
        );

        let mut coins = sled::Batch::default();
        for (txid, coin) in &delta.coins {
            match coin {
                Some(coin) => coins.insert(&txid.0[..], bincode::serialize(coin)?),
                None => coins.remove(&txid.0[..]),
            }
        }

        let mut nullifiers = sled::Batch::default();
        for (nullifier, spent) in &delta.nullifiers {
            if *spent {
                nullifiers.insert(&nullifier.0[..], vec![]);
            } else {
                nullifiers.remove(&nullifier.0[..]);
            }
        }

        let mut anchors = sled::Batch::default();
        for (anchor, present) in &delta.anchors {
            if *present {
                anchors.insert(&anchor.0[..], vec![]);
            } else {
                anchors.remove(&anchor.0[..]);
            }
        }

        let mut sidechains = sled::Batch::default();
        for (scid, record) in &delta.sidechains {
            match record {
                Some(record) => sidechains.insert(&scid.0[..], bincode::serialize(record)?),
                None => sidechains.remove(&scid.0[..]),
            }
        }

        let mut events = sled::Batch::default();
        for ((height, scid), present) in &delta.sidechain_events {
            let key = event_key(*height, scid);
            if *present {
                events.insert(key, vec![]);
            } else {
                events.remove(key);
            }
        }

        let mut csw = sled::Batch::default();
        for ((scid, nullifier), present) in &delta.csw_nullifiers {
            let key = csw_key(scid, nullifier);
            if *present {
                csw.insert(key, vec![]);
            } else {
                csw.remove(key);
            }
        }

        self.coins.apply_batch(coins)?;
        self.nullifiers.apply_batch(nullifiers)?;
        self.anchors.apply_batch(anchors)?;
        self.sidechains.apply_batch(sidechains)?;
        self.sidechain_events.apply_batch(events)?;
        self.csw_nullifiers.apply_batch(csw)?;
        if let Some(best) = delta.best_block {
            self.meta.insert(BEST_BLOCK_KEY, &best.0[..])?;
        }

        metrics::counter!("state.finalized.batch.count", 1);
        metrics::gauge!("state.finalized.coins.len", self.coins.len() as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto as _;
    use zenith_chain::transaction::{LockTime, Transaction};
    use zenith_chain::transparent::{Output, Script};

    #[test]
    fn roundtrip_through_sled() {
        let mut state = FinalizedState::ephemeral();

        let tx = Transaction::new(
            1,
            vec![],
            vec![Output {
                value: 7i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        );
        let txid = tx.hash();

        let mut delta = StateDelta::default();
        delta
            .coins
            .insert(txid, Some(Coin::from_tx(&tx, block::Height(3))));
        delta.nullifiers.insert(Nullifier([5; 32]), true);
        delta
            .sidechain_events
            .insert((block::Height(20), Scid([8; 32])), true);
        delta.best_block = Some(block::Hash([9; 32]));
        state.batch_write(delta).unwrap();

        assert!(state.have_coins(&txid).unwrap());
        assert!(state.nullifier_spent(&Nullifier([5; 32])).unwrap());
        assert_eq!(
            state.sidechain_events_at(block::Height(20)).unwrap(),
            vec![Scid([8; 32])]
        );
        assert_eq!(state.best_block().unwrap(), Some(block::Hash([9; 32])));

        // deletes round-trip too
        let mut delta = StateDelta::default();
        delta.coins.insert(txid, None);
        delta.nullifiers.insert(Nullifier([5; 32]), false);
        state.batch_write(delta).unwrap();
        assert!(!state.have_coins(&txid).unwrap());
        assert!(!state.nullifier_spent(&Nullifier([5; 32])).unwrap());
    }
}
