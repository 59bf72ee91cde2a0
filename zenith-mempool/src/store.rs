//! The mempool store and its derived indexes.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use zenith_chain::{
    amount::{Amount, NonNegative},
    block,
    certificate::Certificate,
    parameters::SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL,
    sidechain::{FieldElement, Scid},
    transaction::{self, Nullifier, Transaction},
    transparent,
};

use crate::entry::{CertEntry, MempoolObject, TxEntry};
use crate::fee::FeeEstimator;

/// Mutation errors: all of them are internal-invariant violations rather
/// than validation verdicts, because the caller is expected to have run the
/// admission pipeline first.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    #[error("object {0} is already in the pool")]
    Duplicate(transaction::Hash),
    #[error("certificate slot (epoch {0}, quality {1}) is already taken")]
    CertSlotTaken(u32, u64),
}

/// The per-sidechain derived index.
#[derive(Clone, Debug)]
pub struct ScidEntry {
    /// The unconfirmed creation of this sidechain, if any.
    pub creation_tx: Option<transaction::Hash>,
    /// Transactions with forward transfers toward this sidechain.
    pub fwd_txs: HashSet<transaction::Hash>,
    /// Transactions with backward-transfer requests toward this sidechain.
    pub mbtr_txs: HashSet<transaction::Hash>,
    /// csw nullifier → the transaction consuming it.
    pub csw_nullifiers: HashMap<FieldElement, transaction::Hash>,
    /// Running total of unconfirmed csw value for this sidechain.
    pub csw_total: Amount<NonNegative>,
    /// Certificates by (epoch, quality); the last entry is top quality.
    pub certs: BTreeMap<(u32, u64), transaction::Hash>,
}

impl Default for ScidEntry {
    fn default() -> Self {
        ScidEntry {
            creation_tx: None,
            fwd_txs: HashSet::new(),
            mbtr_txs: HashSet::new(),
            csw_nullifiers: HashMap::new(),
            csw_total: Amount::zero(),
            certs: BTreeMap::new(),
        }
    }
}

impl ScidEntry {
    fn is_null(&self) -> bool {
        self.creation_tx.is_none()
            && self.fwd_txs.is_empty()
            && self.mbtr_txs.is_empty()
            && self.csw_nullifiers.is_empty()
            && self.certs.is_empty()
    }

    /// The hash of the top-quality certificate, if any.
    pub fn top_quality_cert(&self) -> Option<transaction::Hash> {
        self.certs.values().next_back().copied()
    }

    /// Find the table key of a certificate by hash.
    pub fn cert_key(&self, hash: &transaction::Hash) -> Option<(u32, u64)> {
        self.certs
            .iter()
            .find(|(_, cert_hash)| *cert_hash == hash)
            .map(|(key, _)| *key)
    }
}

/// The indexed store of unconfirmed transactions and certificates.
#[derive(Default)]
pub struct Mempool {
    txs: HashMap<transaction::Hash, TxEntry>,
    certs: HashMap<transaction::Hash, CertEntry>,
    /// outpoint spent → the spender. One-to-one: a second spender is a
    /// conflict and is rejected at admission.
    by_outpoint_spent: HashMap<transparent::OutPoint, transaction::Hash>,
    /// shielded nullifier → the revealing transaction.
    by_nullifier: HashMap<Nullifier, transaction::Hash>,
    by_scid: HashMap<Scid, ScidEntry>,
    /// Fee/priority adjustments applied by the operator.
    deltas: HashMap<transaction::Hash, (f64, i64)>,
    /// Recently added objects awaiting wallet notification, with a
    /// monotonic sequence number.
    recently_added: VecDeque<(u64, MempoolObject)>,
    sequence: u64,
    total_tx_bytes: usize,
    total_cert_bytes: usize,
    pub fee_estimator: FeeEstimator,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool::default()
    }

    // ---- queries ------------------------------------------------------

    pub fn len(&self) -> usize {
        self.txs.len() + self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty() && self.certs.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_tx_bytes + self.total_cert_bytes
    }

    pub fn contains(&self, hash: &transaction::Hash) -> bool {
        self.txs.contains_key(hash) || self.certs.contains_key(hash)
    }

    pub fn tx(&self, hash: &transaction::Hash) -> Option<&TxEntry> {
        self.txs.get(hash)
    }

    pub fn cert(&self, hash: &transaction::Hash) -> Option<&CertEntry> {
        self.certs.get(hash)
    }

    pub fn object(&self, hash: &transaction::Hash) -> Option<MempoolObject> {
        if let Some(entry) = self.txs.get(hash) {
            return Some(MempoolObject::Tx(entry.tx.clone()));
        }
        self.certs
            .get(hash)
            .map(|entry| MempoolObject::Cert(entry.cert.clone()))
    }

    pub fn txs(&self) -> impl Iterator<Item = &TxEntry> {
        self.txs.values()
    }

    pub fn certs(&self) -> impl Iterator<Item = &CertEntry> {
        self.certs.values()
    }

    pub fn spender_of(&self, outpoint: &transparent::OutPoint) -> Option<transaction::Hash> {
        self.by_outpoint_spent.get(outpoint).copied()
    }

    pub fn nullifier_spender(&self, nullifier: &Nullifier) -> Option<transaction::Hash> {
        self.by_nullifier.get(nullifier).copied()
    }

    pub fn scid_entry(&self, scid: &Scid) -> Option<&ScidEntry> {
        self.by_scid.get(scid)
    }

    pub fn scid_entries(&self) -> impl Iterator<Item = (&Scid, &ScidEntry)> {
        self.by_scid.iter()
    }

    pub fn has_sidechain_creation_tx(&self, scid: &Scid) -> bool {
        self.by_scid
            .get(scid)
            .map(|entry| entry.creation_tx.is_some())
            .unwrap_or(false)
    }

    pub fn have_csw_nullifier(&self, scid: &Scid, nullifier: &FieldElement) -> bool {
        self.by_scid
            .get(scid)
            .map(|entry| entry.csw_nullifiers.contains_key(nullifier))
            .unwrap_or(false)
    }

    pub fn csw_count_for(&self, scid: &Scid) -> usize {
        self.by_scid
            .get(scid)
            .map(|entry| entry.csw_nullifiers.len())
            .unwrap_or(0)
    }

    /// Whether any certificate for (scid, epoch) is in the pool.
    pub fn certificate_exists(&self, scid: &Scid, epoch: u32) -> bool {
        self.by_scid
            .get(scid)
            .map(|entry| entry.certs.keys().any(|(e, _)| *e == epoch))
            .unwrap_or(false)
    }

    /// The operator fee/priority adjustment for `hash`.
    pub fn deltas_for(&self, hash: &transaction::Hash) -> (f64, i64) {
        self.deltas.get(hash).copied().unwrap_or((0.0, 0))
    }

    pub fn prioritise(&mut self, hash: transaction::Hash, priority_delta: f64, fee_delta: i64) {
        let entry = self.deltas.entry(hash).or_insert((0.0, 0));
        entry.0 += priority_delta;
        entry.1 += fee_delta;
    }

    pub fn clear_prioritisation(&mut self, hash: &transaction::Hash) {
        self.deltas.remove(hash);
    }

    // ---- admission commit ---------------------------------------------

    /// Add a checked transaction to the pool and every derived index.
    ///
    /// Atomic; assumes the caller has run the admission pipeline.
    pub fn add_tx_unchecked(&mut self, entry: TxEntry) -> Result<(), MempoolError> {
        let hash = entry.tx.hash();
        if self.contains(&hash) {
            return Err(MempoolError::Duplicate(hash));
        }
        let tx = entry.tx.clone();

        for outpoint in tx.spent_outpoints() {
            self.by_outpoint_spent.insert(outpoint, hash);
        }
        for nullifier in tx.nullifiers() {
            self.by_nullifier.insert(*nullifier, hash);
        }
        for csw in tx.csw_inputs() {
            let scid_entry = self.by_scid.entry(csw.scid).or_default();
            scid_entry.csw_nullifiers.insert(csw.nullifier, hash);
            scid_entry.csw_total = (scid_entry.csw_total + csw.value)
                .expect("admission bounded csw totals by the sidechain balance");
        }
        for (scid, _) in tx.sidechain_creations() {
            trace!(%scid, %hash, "adding creation to sidechain index");
            self.by_scid.entry(scid).or_default().creation_tx = Some(hash);
        }
        for fwd in tx.forward_transfers() {
            self.by_scid.entry(fwd.scid).or_default().fwd_txs.insert(hash);
        }
        for mbtr in tx.bwt_requests() {
            self.by_scid.entry(mbtr.scid).or_default().mbtr_txs.insert(hash);
        }

        self.total_tx_bytes += entry.size;
        self.fee_estimator.process_admission(&entry);
        self.txs.insert(hash, entry);
        self.push_recently_added(MempoolObject::Tx(tx));
        metrics::gauge!("mempool.tx.count", self.txs.len() as f64);
        Ok(())
    }

    /// Add a checked certificate to the pool and every derived index.
    pub fn add_cert_unchecked(&mut self, entry: CertEntry) -> Result<(), MempoolError> {
        let hash = entry.cert.hash();
        if self.contains(&hash) {
            return Err(MempoolError::Duplicate(hash));
        }
        let cert = entry.cert.clone();

        let scid_entry = self.by_scid.entry(cert.scid).or_default();
        let key = (cert.epoch_number, cert.quality);
        if scid_entry.certs.contains_key(&key) {
            return Err(MempoolError::CertSlotTaken(key.0, key.1));
        }
        scid_entry.certs.insert(key, hash);

        for outpoint in cert.spent_outpoints() {
            self.by_outpoint_spent.insert(outpoint, hash);
        }

        debug!(%hash, scid = %cert.scid, quality = cert.quality, "cert added to mempool");
        self.total_cert_bytes += entry.size;
        self.certs.insert(hash, entry);
        self.push_recently_added(MempoolObject::Cert(cert));
        metrics::gauge!("mempool.cert.count", self.certs.len() as f64);
        Ok(())
    }

    fn push_recently_added(&mut self, object: MempoolObject) {
        self.sequence += 1;
        self.recently_added.push_back((self.sequence, object));
    }

    /// Drain the recently-added queue, in admission order.
    pub fn drain_recently_added(&mut self) -> Vec<(u64, MempoolObject)> {
        self.recently_added.drain(..).collect()
    }

    // ---- removal ------------------------------------------------------

    /// Remove an object; with `recursive`, also remove every dependent
    /// reachable through spent outpoints or the scCreation → {fwd, mbtr}
    /// edges.
    ///
    /// Returns the removed transactions and certificates.
    pub fn remove(
        &mut self,
        root: &transaction::Hash,
        recursive: bool,
    ) -> (Vec<Arc<Transaction>>, Vec<Arc<Certificate>>) {
        let mut to_remove = vec![*root];
        if recursive {
            to_remove.extend(self.dependents_of(root));
        }

        let mut removed_txs = Vec::new();
        let mut removed_certs = Vec::new();

        for hash in to_remove {
            if let Some(entry) = self.txs.remove(&hash) {
                let tx = entry.tx;

                for outpoint in tx.spent_outpoints() {
                    self.by_outpoint_spent.remove(&outpoint);
                }
                for nullifier in tx.nullifiers() {
                    self.by_nullifier.remove(nullifier);
                }
                for csw in tx.csw_inputs() {
                    if let Some(scid_entry) = self.by_scid.get_mut(&csw.scid) {
                        scid_entry.csw_nullifiers.remove(&csw.nullifier);
                        scid_entry.csw_total = (scid_entry.csw_total - csw.value)
                            .unwrap_or_else(|_| Amount::zero());
                    }
                    self.drop_scid_if_null(&csw.scid);
                }
                for (scid, _) in tx.sidechain_creations() {
                    if let Some(scid_entry) = self.by_scid.get_mut(&scid) {
                        scid_entry.creation_tx = None;
                    }
                    self.drop_scid_if_null(&scid);
                }
                for fwd in tx.forward_transfers() {
                    if let Some(scid_entry) = self.by_scid.get_mut(&fwd.scid) {
                        scid_entry.fwd_txs.remove(&hash);
                    }
                    self.drop_scid_if_null(&fwd.scid);
                }
                for mbtr in tx.bwt_requests() {
                    if let Some(scid_entry) = self.by_scid.get_mut(&mbtr.scid) {
                        scid_entry.mbtr_txs.remove(&hash);
                    }
                    self.drop_scid_if_null(&mbtr.scid);
                }

                self.total_tx_bytes = self.total_tx_bytes.saturating_sub(entry.size);
                self.fee_estimator.process_removal(&hash);
                trace!(%hash, "removing tx from mempool");
                removed_txs.push(tx);
            } else if let Some(entry) = self.certs.remove(&hash) {
                let cert = entry.cert;

                for outpoint in cert.spent_outpoints() {
                    self.by_outpoint_spent.remove(&outpoint);
                }
                if let Some(scid_entry) = self.by_scid.get_mut(&cert.scid) {
                    if let Some(key) = scid_entry.cert_key(&hash) {
                        scid_entry.certs.remove(&key);
                    }
                }
                self.drop_scid_if_null(&cert.scid);

                self.total_cert_bytes = self.total_cert_bytes.saturating_sub(entry.size);
                trace!(%hash, "removing cert from mempool");
                removed_certs.push(cert);
            }
            self.recently_added.retain(|(_, object)| object.hash() != hash);
        }

        metrics::gauge!("mempool.tx.count", self.txs.len() as f64);
        metrics::gauge!("mempool.cert.count", self.certs.len() as f64);
        (removed_txs, removed_certs)
    }

    fn drop_scid_if_null(&mut self, scid: &Scid) {
        if self
            .by_scid
            .get(scid)
            .map(ScidEntry::is_null)
            .unwrap_or(false)
        {
            trace!(%scid, "erasing empty sidechain index entry");
            self.by_scid.remove(scid);
        }
    }

    // ---- dependency graph ---------------------------------------------

    /// Pool objects whose outputs `hash` spends, plus the unconfirmed
    /// creation of every sidechain `hash` sends forward transfers or
    /// backward-transfer requests to.
    pub fn direct_dependencies_of(&self, hash: &transaction::Hash) -> Vec<transaction::Hash> {
        let object = match self.object(hash) {
            Some(object) => object,
            None => return Vec::new(),
        };

        let mut deps = HashSet::new();
        for outpoint in object.spent_outpoints() {
            if self.contains(&outpoint.hash) {
                deps.insert(outpoint.hash);
            }
        }
        if let Some(tx) = object.as_tx() {
            for fwd in tx.forward_transfers() {
                if let Some(creation) = self.by_scid.get(&fwd.scid).and_then(|e| e.creation_tx) {
                    deps.insert(creation);
                }
            }
            for mbtr in tx.bwt_requests() {
                if let Some(creation) = self.by_scid.get(&mbtr.scid).and_then(|e| e.creation_tx) {
                    deps.insert(creation);
                }
            }
        }
        deps.remove(hash);
        deps.into_iter().collect()
    }

    /// Transitive closure of [`Self::direct_dependencies_of`], breadth
    /// first.
    pub fn dependencies_of(&self, hash: &transaction::Hash) -> Vec<transaction::Hash> {
        self.bfs(hash, |pool, node| pool.direct_dependencies_of(node))
    }

    /// Pool objects that spend an output of `hash`, plus every fwd/mbtr
    /// transaction toward a sidechain whose creation is `hash`.
    pub fn direct_dependents_of(&self, hash: &transaction::Hash) -> Vec<transaction::Hash> {
        let object = match self.object(hash) {
            Some(object) => object,
            None => return Vec::new(),
        };

        let mut dependents = HashSet::new();

        let output_count = match &object {
            MempoolObject::Tx(tx) => tx.outputs.len(),
            MempoolObject::Cert(cert) => cert.output_count(),
        };
        for index in 0..output_count as u32 {
            let outpoint = transparent::OutPoint { hash: *hash, index };
            if let Some(spender) = self.by_outpoint_spent.get(&outpoint) {
                dependents.insert(*spender);
            }
        }

        if let Some(tx) = object.as_tx() {
            for (scid, _) in tx.sidechain_creations() {
                if let Some(scid_entry) = self.by_scid.get(&scid) {
                    dependents.extend(scid_entry.fwd_txs.iter().copied());
                    dependents.extend(scid_entry.mbtr_txs.iter().copied());
                }
            }
        }
        dependents.remove(hash);
        dependents.into_iter().collect()
    }

    /// Transitive closure of [`Self::direct_dependents_of`], breadth
    /// first. This is the set removed by a recursive [`Self::remove`].
    pub fn dependents_of(&self, hash: &transaction::Hash) -> Vec<transaction::Hash> {
        self.bfs(hash, |pool, node| pool.direct_dependents_of(node))
    }

    fn bfs(
        &self,
        root: &transaction::Hash,
        neighbors: impl Fn(&Mempool, &transaction::Hash) -> Vec<transaction::Hash>,
    ) -> Vec<transaction::Hash> {
        let mut visited: HashSet<transaction::Hash> = HashSet::new();
        let mut queue: VecDeque<transaction::Hash> = VecDeque::new();
        let mut order = Vec::new();

        visited.insert(*root);
        queue.push_back(*root);

        while let Some(node) = queue.pop_front() {
            for next in neighbors(self, &node) {
                if visited.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    // ---- eviction -----------------------------------------------------

    /// Evict lowest-fee-rate leaves until the pool fits in `max_bytes`.
    ///
    /// Only objects with no in-pool dependents are candidates, so a parent
    /// is never evicted while a child remains.
    pub fn trim_to_size(&mut self, max_bytes: usize) -> Vec<transaction::Hash> {
        let mut evicted = Vec::new();
        while self.total_bytes() > max_bytes {
            let candidate = self
                .txs
                .values()
                .map(|entry| (entry.tx.hash(), entry.fee_rate()))
                .chain(
                    self.certs
                        .values()
                        .map(|entry| (entry.cert.hash(), entry.fee_rate())),
                )
                .filter(|(hash, _)| self.direct_dependents_of(hash).is_empty())
                .min_by_key(|(_, fee_rate)| *fee_rate)
                .map(|(hash, _)| hash);

            match candidate {
                Some(hash) => {
                    debug!(%hash, "evicting for mempool size");
                    self.remove(&hash, false);
                    evicted.push(hash);
                }
                None => break,
            }
        }
        evicted
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.txs.clear();
        self.certs.clear();
        self.by_outpoint_spent.clear();
        self.by_nullifier.clear();
        self.by_scid.clear();
        self.deltas.clear();
        self.recently_added.clear();
        self.total_tx_bytes = 0;
        self.total_cert_bytes = 0;
    }

    /// Expensive invariant walk: every derived index entry is backed by a
    /// stored object and vice versa. Opt-in, as in the original: enabling
    /// it per admission makes the pool quadratic.
    pub fn check_invariants(&self) {
        for (outpoint, spender) in &self.by_outpoint_spent {
            let object = self.object(spender).expect("spender is stored");
            assert!(
                object.spent_outpoints().contains(outpoint),
                "outpoint index entry not backed by its object"
            );
        }
        for (nullifier, spender) in &self.by_nullifier {
            let entry = self.txs.get(spender).expect("nullifier spender is stored");
            assert!(
                entry.tx.nullifiers().any(|nf| nf == nullifier),
                "nullifier index entry not backed by its tx"
            );
        }
        for (scid, scid_entry) in &self.by_scid {
            assert!(!scid_entry.is_null(), "empty scid entry retained");
            if let Some(creation) = scid_entry.creation_tx {
                let entry = self.txs.get(&creation).expect("creation tx is stored");
                assert!(
                    entry.tx.sidechain_creations().any(|(id, _)| id == *scid),
                    "creation index entry not backed by its tx"
                );
            }
            for cert_hash in scid_entry.certs.values() {
                let entry = self.certs.get(cert_hash).expect("cert is stored");
                assert_eq!(entry.cert.scid, *scid);
            }
            for tx_hash in scid_entry.fwd_txs.iter().chain(scid_entry.mbtr_txs.iter()) {
                assert!(self.txs.contains_key(tx_hash), "dangling fwd/mbtr entry");
            }
            for tx_hash in scid_entry.csw_nullifiers.values() {
                assert!(self.txs.contains_key(tx_hash), "dangling csw entry");
            }
        }
        for entry in self.txs.values() {
            for outpoint in entry.tx.spent_outpoints() {
                assert_eq!(
                    self.by_outpoint_spent.get(&outpoint),
                    Some(&entry.tx.hash()),
                    "stored tx missing from outpoint index"
                );
            }
        }
    }

    // ---- admission-side conflict queries ------------------------------

    /// Whether `tx` conflicts with the pool: duplicate hash, double-spent
    /// outpoint, reused shielded nullifier, or reused csw nullifier.
    pub fn check_incoming_tx_conflicts(&self, tx: &Transaction) -> bool {
        let hash = tx.hash();
        if self.contains(&hash) {
            return false;
        }
        for outpoint in tx.spent_outpoints() {
            if self.by_outpoint_spent.contains_key(&outpoint) {
                return false;
            }
        }
        for nullifier in tx.nullifiers() {
            if self.by_nullifier.contains_key(nullifier) {
                return false;
            }
        }
        for csw in tx.csw_inputs() {
            if self.have_csw_nullifier(&csw.scid, &csw.nullifier) {
                return false;
            }
        }
        for (scid, _) in tx.sidechain_creations() {
            if self.has_sidechain_creation_tx(&scid) {
                return false;
            }
        }
        true
    }

    /// Whether admitting `tx` would keep every touched sidechain within
    /// the per-sidechain csw input bound.
    pub fn check_csw_inputs_per_sc_limit(&self, tx: &Transaction) -> bool {
        let mut per_scid: HashMap<Scid, usize> = HashMap::new();
        for csw in tx.csw_inputs() {
            *per_scid.entry(csw.scid).or_insert(0) += 1;
        }
        for (scid, incoming) in per_scid {
            if self.csw_count_for(&scid) + incoming > SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL {
                return false;
            }
        }
        true
    }

    /// Whether `cert` conflicts with the pool.
    ///
    /// Certificates may spend change outputs of other pool certificates,
    /// never their backward transfers, and no certificate may depend
    /// (transitively) on a higher-or-equal-quality certificate of its own
    /// (scid, epoch).
    pub fn check_incoming_cert_conflicts(&self, cert: &Certificate) -> bool {
        let hash = cert.hash();
        if self.contains(&hash) {
            debug!(%hash, "dropping cert: already in mempool");
            return false;
        }

        for outpoint in cert.spent_outpoints() {
            if self.by_outpoint_spent.contains_key(&outpoint) {
                debug!(%hash, "dropping cert: double spends a pool input");
                return false;
            }
            if let Some(input_entry) = self.certs.get(&outpoint.hash) {
                if input_entry.cert.is_backward_transfer(outpoint.index as usize) {
                    debug!(
                        %hash,
                        "dropping cert: spends an unconfirmed backward transfer"
                    );
                    return false;
                }
            }
        }

        // quality rule over the dependency closure
        for dep in self.spent_pool_ancestors(cert) {
            if let Some(dep_entry) = self.certs.get(&dep) {
                let dep_cert = &dep_entry.cert;
                if dep_cert.scid == cert.scid
                    && dep_cert.epoch_number == cert.epoch_number
                    && dep_cert.quality >= cert.quality
                {
                    debug!(
                        %hash,
                        ancestor = %dep,
                        "dropping cert: depends on better-quality certificate"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// The pool closure of objects whose outputs `cert` would spend,
    /// computed before `cert` itself is in the pool.
    fn spent_pool_ancestors(&self, cert: &Certificate) -> Vec<transaction::Hash> {
        let mut visited: HashSet<transaction::Hash> = HashSet::new();
        let mut queue: VecDeque<transaction::Hash> = VecDeque::new();
        let mut order = Vec::new();

        for outpoint in cert.spent_outpoints() {
            if self.contains(&outpoint.hash) && visited.insert(outpoint.hash) {
                order.push(outpoint.hash);
                queue.push_back(outpoint.hash);
            }
        }
        while let Some(node) = queue.pop_front() {
            for next in self.direct_dependencies_of(&node) {
                if visited.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Whether an incoming certificate's referenced height slots into the
    /// strictly increasing per-epoch order of the pool's certificates for
    /// its sidechain (non-ceasing flow).
    pub fn check_referenced_height<R: crate::ReferencedHeights>(
        &self,
        cert: &Certificate,
        resolver: &R,
    ) -> bool {
        let incoming_height =
            match resolver.height_for_cum_commitment(&cert.end_epoch_cum_tree_root) {
                Some(height) => height,
                // no reference info means a ceasing (pre-versioned)
                // sidechain; nothing to order
                None => return true,
            };

        let scid_entry = match self.by_scid.get(&cert.scid) {
            Some(entry) => entry,
            None => return true,
        };

        let mut prev_epoch: Option<u32> = None;
        let mut prev_height: Option<block::Height> = None;
        let mut inserted = false;

        for ((epoch, _quality), cert_hash) in &scid_entry.certs {
            if prev_epoch == Some(*epoch) {
                // same-epoch entries only occur for ceasing sidechains,
                // which are ordered by quality, not referenced height
                return true;
            }

            let pool_cert = &self.certs[cert_hash].cert;
            let pool_height =
                match resolver.height_for_cum_commitment(&pool_cert.end_epoch_cum_tree_root) {
                    Some(height) => height,
                    None => {
                        trace!(cert = %cert_hash, "pool cert lost its reference block");
                        continue;
                    }
                };

            if let Some(prev) = prev_height {
                if prev >= pool_height {
                    return false;
                }
            }

            if *epoch > cert.epoch_number && !inserted {
                // the incoming cert must slot strictly between its epoch
                // neighbours
                if prev_height.map(|prev| incoming_height <= prev).unwrap_or(false)
                    || incoming_height >= pool_height
                {
                    return false;
                }
                inserted = true;
            }

            prev_epoch = Some(*epoch);
            prev_height = Some(pool_height);
        }

        if !inserted && prev_epoch != Some(cert.epoch_number) {
            if let Some(prev) = prev_height {
                if prev >= incoming_height {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests;
