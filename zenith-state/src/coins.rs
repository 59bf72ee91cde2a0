//! The layered coin view.
//!
//! Three layers share one read contract: the sled-backed [`FinalizedState`]
//! at the bottom, a [`CoinsCache`] overlay that batches writes, and (in
//! `zenith-mempool`) an overlay that materializes unconfirmed objects as
//! ephemeral coins. Reads fall through to the inner layer and are cached on
//! first access; writes accumulate in the cache and reach the inner layer
//! only through an explicit, atomic [`WriteableCoinView::batch_write`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use zenith_chain::{
    block,
    certificate::Certificate,
    parameters::COINBASE_MATURITY,
    sidechain::{FieldElement, Scid},
    transaction::{self, Anchor, Nullifier, Transaction},
    transparent,
};

use crate::sidechain::SidechainRecord;
use crate::BoxError;

/// What kind of object created a coin record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CoinOwnership {
    /// An ordinary transaction.
    Regular,
    /// A coinbase transaction; outputs locked for `COINBASE_MATURITY`.
    Coinbase,
    /// A certificate; backward-transfer outputs locked until their maturity
    /// height.
    Certificate,
}

/// The unspent outputs of one transaction or certificate.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    /// Who created this coin record.
    pub ownership: CoinOwnership,
    /// Outputs by position; `None` marks a spent (or voided) slot.
    pub outputs: Vec<Option<transparent::Output>>,
    /// The height the creating object was confirmed at.
    pub height: block::Height,
    /// For certificate coins, the height at which backward-transfer outputs
    /// become spendable.
    pub bwt_maturity_height: Option<block::Height>,
    /// For certificate coins, the position of the first backward-transfer
    /// output.
    pub first_bwt_pos: Option<usize>,
}

impl Coin {
    /// The coin record produced by confirming `tx` at `height`.
    pub fn from_tx(tx: &Transaction, height: block::Height) -> Coin {
        Coin {
            ownership: if tx.is_coinbase() {
                CoinOwnership::Coinbase
            } else {
                CoinOwnership::Regular
            },
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
            height,
            bwt_maturity_height: None,
            first_bwt_pos: None,
        }
    }

    /// The coin record produced by confirming `cert` at `height`.
    ///
    /// When the certificate is not top quality for its (scid, epoch), its
    /// backward transfers are voided: the slots exist but are unspendable
    /// forever.
    pub fn from_cert(
        cert: &Certificate,
        height: block::Height,
        bwt_maturity_height: block::Height,
        top_quality: bool,
    ) -> Coin {
        let mut outputs: Vec<Option<transparent::Output>> =
            cert.outputs.iter().cloned().map(Some).collect();
        for bt in &cert.backward_transfers {
            if top_quality {
                outputs.push(Some(bt.to_output()));
            } else {
                outputs.push(None);
            }
        }
        Coin {
            ownership: CoinOwnership::Certificate,
            outputs,
            height,
            bwt_maturity_height: Some(bwt_maturity_height),
            first_bwt_pos: Some(cert.first_bwt_pos()),
        }
    }

    /// The unspent output at `index`.
    pub fn output(&self, index: u32) -> Option<&transparent::Output> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    /// Mark the output at `index` spent, returning the previous value.
    pub fn spend(&mut self, index: u32) -> Option<transparent::Output> {
        self.outputs.get_mut(index as usize).and_then(Option::take)
    }

    /// Whether every output slot is spent.
    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    /// Void every unspent backward-transfer output, returning their total
    /// value. Used when a higher-quality certificate demotes this coin's
    /// certificate.
    pub fn void_backward_transfers(
        &mut self,
    ) -> Result<crate::Amount<crate::NonNegative>, zenith_chain::amount::Error> {
        use std::convert::TryInto;

        let first_bwt = match self.first_bwt_pos {
            Some(pos) => pos,
            None => return Ok(crate::Amount::zero()),
        };
        let mut total: i64 = 0;
        for slot in self.outputs.iter_mut().skip(first_bwt) {
            if let Some(output) = slot.take() {
                total += output.value.zatoshi();
            }
        }
        total.try_into()
    }

    /// Whether the output at `index` may be spent by a transaction confirmed
    /// at `spend_height`.
    pub fn is_output_mature(&self, index: u32, spend_height: block::Height) -> bool {
        match self.ownership {
            CoinOwnership::Regular => true,
            CoinOwnership::Coinbase => match self.height + COINBASE_MATURITY {
                Some(mature_at) => spend_height >= mature_at,
                None => false,
            },
            CoinOwnership::Certificate => {
                let is_bwt = self
                    .first_bwt_pos
                    .map(|pos| index as usize >= pos)
                    .unwrap_or(false);
                if !is_bwt {
                    return true;
                }
                match self.bwt_maturity_height {
                    Some(mature_at) => spend_height >= mature_at,
                    None => false,
                }
            }
        }
    }
}

/// The delta applied by one `batch_write`: the net effect of connecting (or
/// disconnecting) blocks since the last flush.
#[derive(Clone, Debug, Default)]
pub struct StateDelta {
    /// Modified coin records; `None` deletes the record.
    pub coins: HashMap<transaction::Hash, Option<Coin>>,
    /// Shielded nullifiers; `true` marks spent, `false` un-marks on
    /// disconnect.
    pub nullifiers: HashMap<Nullifier, bool>,
    /// Commitment-tree anchors; `true` adds, `false` removes.
    pub anchors: HashMap<Anchor, bool>,
    /// Modified sidechain records; `None` deletes (creation reverted).
    pub sidechains: HashMap<Scid, Option<SidechainRecord>>,
    /// Scheduled sidechain cease events; `true` adds, `false` removes.
    pub sidechain_events: HashMap<(block::Height, Scid), bool>,
    /// csw nullifiers per sidechain; `true` adds, `false` removes.
    pub csw_nullifiers: HashMap<(Scid, FieldElement), bool>,
    /// The tip this delta moves the view to.
    pub best_block: Option<block::Hash>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
            && self.nullifiers.is_empty()
            && self.anchors.is_empty()
            && self.sidechains.is_empty()
            && self.sidechain_events.is_empty()
            && self.csw_nullifiers.is_empty()
            && self.best_block.is_none()
    }
}

/// The uniform read contract shared by every layer of the coin view stack.
pub trait CoinView {
    /// The coin record for `txid`, or `None`.
    fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coin>, BoxError>;

    /// Whether a coin record for `txid` exists with at least one unspent
    /// output.
    fn have_coins(&self, txid: &transaction::Hash) -> Result<bool, BoxError> {
        Ok(self
            .coins(txid)?
            .map(|coin| !coin.is_fully_spent())
            .unwrap_or(false))
    }

    /// Whether `nullifier` has been revealed in the shielded pool.
    fn nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool, BoxError>;

    /// Whether `anchor` is a known commitment-tree root.
    fn have_anchor(&self, anchor: &Anchor) -> Result<bool, BoxError>;

    /// The sidechain record for `scid`, or `None`.
    fn sidechain(&self, scid: &Scid) -> Result<Option<SidechainRecord>, BoxError>;

    /// Whether a sidechain record for `scid` exists.
    fn have_sidechain(&self, scid: &Scid) -> Result<bool, BoxError> {
        Ok(self.sidechain(scid)?.is_some())
    }

    /// Whether `nullifier` has been consumed by a csw for `scid`.
    fn have_csw_nullifier(&self, scid: &Scid, nullifier: &FieldElement)
        -> Result<bool, BoxError>;

    /// The cease events scheduled at `height`.
    fn sidechain_events_at(&self, height: block::Height) -> Result<Vec<Scid>, BoxError>;

    /// The tip this view represents, or `None` for an empty state.
    fn best_block(&self) -> Result<Option<block::Hash>, BoxError>;
}

/// A layer that accepts atomic deltas.
pub trait WriteableCoinView: CoinView {
    /// Atomically apply `delta`.
    fn batch_write(&mut self, delta: StateDelta) -> Result<(), BoxError>;
}

/// The caching overlay: reads fall through and are memoized; writes stay
/// here until `flush` pushes them down in one batch.
pub struct CoinsCache<V> {
    inner: V,
    // read-through memo plus pending writes; an entry present here always
    // wins over the inner layer
    coins: RefCell<HashMap<transaction::Hash, Option<Coin>>>,
    dirty_coins: HashSet<transaction::Hash>,
    nullifiers: RefCell<HashMap<Nullifier, bool>>,
    dirty_nullifiers: HashSet<Nullifier>,
    anchors: RefCell<HashMap<Anchor, bool>>,
    dirty_anchors: HashSet<Anchor>,
    sidechains: RefCell<HashMap<Scid, Option<SidechainRecord>>>,
    dirty_sidechains: HashSet<Scid>,
    events: RefCell<BTreeMap<block::Height, HashSet<Scid>>>,
    event_edits: HashMap<(block::Height, Scid), bool>,
    loaded_event_heights: RefCell<HashSet<block::Height>>,
    csw_nullifiers: RefCell<HashMap<(Scid, FieldElement), bool>>,
    dirty_csw_nullifiers: HashSet<(Scid, FieldElement)>,
    best_block: RefCell<Option<Option<block::Hash>>>,
    dirty_best_block: bool,
}

impl<V: CoinView> CoinsCache<V> {
    pub fn new(inner: V) -> CoinsCache<V> {
        CoinsCache {
            inner,
            coins: RefCell::new(HashMap::new()),
            dirty_coins: HashSet::new(),
            nullifiers: RefCell::new(HashMap::new()),
            dirty_nullifiers: HashSet::new(),
            anchors: RefCell::new(HashMap::new()),
            dirty_anchors: HashSet::new(),
            sidechains: RefCell::new(HashMap::new()),
            dirty_sidechains: HashSet::new(),
            events: RefCell::new(BTreeMap::new()),
            event_edits: HashMap::new(),
            loaded_event_heights: RefCell::new(HashSet::new()),
            csw_nullifiers: RefCell::new(HashMap::new()),
            dirty_csw_nullifiers: HashSet::new(),
            best_block: RefCell::new(None),
            dirty_best_block: false,
        }
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }

    /// A rough measure of cache occupancy, for the `DbCache` bound.
    pub fn cached_entries(&self) -> usize {
        self.coins.borrow().len()
            + self.nullifiers.borrow().len()
            + self.sidechains.borrow().len()
            + self.csw_nullifiers.borrow().len()
    }

    /// Stage a coin insert or update.
    pub fn put_coin(&mut self, txid: transaction::Hash, coin: Coin) {
        self.coins.borrow_mut().insert(txid, Some(coin));
        self.dirty_coins.insert(txid);
    }

    /// Stage a coin delete.
    pub fn remove_coin(&mut self, txid: &transaction::Hash) {
        self.coins.borrow_mut().insert(*txid, None);
        self.dirty_coins.insert(*txid);
    }

    /// Stage a spend of one output, returning the output for the undo
    /// record. Errors if the coin or output is absent.
    pub fn spend_output(
        &mut self,
        outpoint: &transparent::OutPoint,
    ) -> Result<transparent::Output, BoxError> {
        let mut coin = self
            .coins(&outpoint.hash)?
            .ok_or_else(|| format!("spend of missing coin {}", outpoint.hash))?;
        let output = coin
            .spend(outpoint.index)
            .ok_or_else(|| format!("spend of missing output {:?}", outpoint))?;
        self.put_coin(outpoint.hash, coin);
        Ok(output)
    }

    pub fn set_nullifier(&mut self, nullifier: Nullifier, spent: bool) {
        self.nullifiers.borrow_mut().insert(nullifier, spent);
        self.dirty_nullifiers.insert(nullifier);
    }

    pub fn add_anchor(&mut self, anchor: Anchor) {
        self.anchors.borrow_mut().insert(anchor, true);
        self.dirty_anchors.insert(anchor);
    }

    pub fn remove_anchor(&mut self, anchor: Anchor) {
        self.anchors.borrow_mut().insert(anchor, false);
        self.dirty_anchors.insert(anchor);
    }

    pub fn put_sidechain(&mut self, scid: Scid, record: SidechainRecord) {
        self.sidechains.borrow_mut().insert(scid, Some(record));
        self.dirty_sidechains.insert(scid);
    }

    pub fn remove_sidechain(&mut self, scid: &Scid) {
        self.sidechains.borrow_mut().insert(*scid, None);
        self.dirty_sidechains.insert(*scid);
    }

    pub fn add_sidechain_event(&mut self, height: block::Height, scid: Scid) {
        self.prime_events(height);
        self.events.borrow_mut().entry(height).or_default().insert(scid);
        self.event_edits.insert((height, scid), true);
    }

    pub fn remove_sidechain_event(&mut self, height: block::Height, scid: Scid) {
        self.prime_events(height);
        if let Some(set) = self.events.borrow_mut().get_mut(&height) {
            set.remove(&scid);
        }
        self.event_edits.insert((height, scid), false);
    }

    fn prime_events(&self, height: block::Height) {
        if self.loaded_event_heights.borrow().contains(&height) {
            return;
        }
        if let Ok(scids) = self.inner.sidechain_events_at(height) {
            self.events
                .borrow_mut()
                .entry(height)
                .or_default()
                .extend(scids);
        }
        self.loaded_event_heights.borrow_mut().insert(height);
    }

    pub fn set_csw_nullifier(&mut self, scid: Scid, nullifier: FieldElement, present: bool) {
        self.csw_nullifiers
            .borrow_mut()
            .insert((scid, nullifier), present);
        self.dirty_csw_nullifiers.insert((scid, nullifier));
    }

    pub fn set_best_block(&mut self, hash: block::Hash) {
        *self.best_block.borrow_mut() = Some(Some(hash));
        self.dirty_best_block = true;
    }

    /// The pending delta, as it would be flushed.
    pub fn pending_delta(&self) -> StateDelta {
        let coins = self.coins.borrow();
        let nullifiers = self.nullifiers.borrow();
        let anchors = self.anchors.borrow();
        let sidechains = self.sidechains.borrow();
        let csw = self.csw_nullifiers.borrow();

        StateDelta {
            coins: self
                .dirty_coins
                .iter()
                .map(|txid| (*txid, coins.get(txid).cloned().flatten()))
                .collect(),
            nullifiers: self
                .dirty_nullifiers
                .iter()
                .map(|nf| (*nf, nullifiers.get(nf).copied().unwrap_or(false)))
                .collect(),
            anchors: self
                .dirty_anchors
                .iter()
                .map(|anchor| (*anchor, anchors.get(anchor).copied().unwrap_or(false)))
                .collect(),
            sidechains: self
                .dirty_sidechains
                .iter()
                .map(|scid| (*scid, sidechains.get(scid).cloned().flatten()))
                .collect(),
            sidechain_events: self.event_edits.clone(),
            csw_nullifiers: self
                .dirty_csw_nullifiers
                .iter()
                .map(|key| (*key, csw.get(key).copied().unwrap_or(false)))
                .collect(),
            best_block: if self.dirty_best_block {
                self.best_block.borrow().clone().flatten()
            } else {
                None
            },
        }
    }

    fn clear_dirty(&mut self) {
        self.dirty_coins.clear();
        self.dirty_nullifiers.clear();
        self.dirty_anchors.clear();
        self.dirty_sidechains.clear();
        self.event_edits.clear();
        self.dirty_csw_nullifiers.clear();
        self.dirty_best_block = false;
    }

    /// Drop the memoized reads, keeping pending writes. Used when the cache
    /// grows past the `DbCache` bound after a flush.
    pub fn trim_clean_entries(&mut self) {
        let dirty = &self.dirty_coins;
        self.coins.borrow_mut().retain(|txid, _| dirty.contains(txid));
        let dirty = &self.dirty_nullifiers;
        self.nullifiers.borrow_mut().retain(|nf, _| dirty.contains(nf));
        let dirty = &self.dirty_sidechains;
        self.sidechains
            .borrow_mut()
            .retain(|scid, _| dirty.contains(scid));
        let dirty = &self.dirty_csw_nullifiers;
        self.csw_nullifiers
            .borrow_mut()
            .retain(|key, _| dirty.contains(key));
    }
}

impl<V: WriteableCoinView> CoinsCache<V> {
    /// Push the pending delta down to the inner layer.
    pub fn flush(&mut self) -> Result<(), BoxError> {
        let delta = self.pending_delta();
        if delta.is_empty() {
            return Ok(());
        }
        self.inner.batch_write(delta)?;
        self.clear_dirty();
        Ok(())
    }
}

impl<V: CoinView> CoinView for CoinsCache<V> {
    fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coin>, BoxError> {
        if let Some(entry) = self.coins.borrow().get(txid) {
            return Ok(entry.clone());
        }
        let from_inner = self.inner.coins(txid)?;
        self.coins.borrow_mut().insert(*txid, from_inner.clone());
        Ok(from_inner)
    }

    fn nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool, BoxError> {
        if let Some(&spent) = self.nullifiers.borrow().get(nullifier) {
            return Ok(spent);
        }
        let spent = self.inner.nullifier_spent(nullifier)?;
        self.nullifiers.borrow_mut().insert(*nullifier, spent);
        Ok(spent)
    }

    fn have_anchor(&self, anchor: &Anchor) -> Result<bool, BoxError> {
        if let Some(&present) = self.anchors.borrow().get(anchor) {
            return Ok(present);
        }
        let present = self.inner.have_anchor(anchor)?;
        self.anchors.borrow_mut().insert(*anchor, present);
        Ok(present)
    }

    fn sidechain(&self, scid: &Scid) -> Result<Option<SidechainRecord>, BoxError> {
        if let Some(entry) = self.sidechains.borrow().get(scid) {
            return Ok(entry.clone());
        }
        let from_inner = self.inner.sidechain(scid)?;
        self.sidechains.borrow_mut().insert(*scid, from_inner.clone());
        Ok(from_inner)
    }

    fn have_csw_nullifier(
        &self,
        scid: &Scid,
        nullifier: &FieldElement,
    ) -> Result<bool, BoxError> {
        let key = (*scid, *nullifier);
        if let Some(&present) = self.csw_nullifiers.borrow().get(&key) {
            return Ok(present);
        }
        let present = self.inner.have_csw_nullifier(scid, nullifier)?;
        self.csw_nullifiers.borrow_mut().insert(key, present);
        Ok(present)
    }

    fn sidechain_events_at(&self, height: block::Height) -> Result<Vec<Scid>, BoxError> {
        self.prime_events(height);
        Ok(self
            .events
            .borrow()
            .get(&height)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn best_block(&self) -> Result<Option<block::Hash>, BoxError> {
        if let Some(cached) = self.best_block.borrow().clone() {
            return Ok(cached);
        }
        let from_inner = self.inner.best_block()?;
        *self.best_block.borrow_mut() = Some(from_inner);
        Ok(from_inner)
    }
}
