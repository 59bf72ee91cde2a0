//! Conflict removal and stale-object sweeps.
//!
//! Conflict removal runs on every block connect: anything the block's
//! transactions and certificates superseded leaves the pool, recursively.
//! The stale sweep runs after any tip change and re-validates the pool
//! against the new chain: maturity of spent coinbase/bwt outputs,
//! sidechain liveness and minimum fees, csw state and balance caps, and
//! certificate timing.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use zenith_chain::{
    block,
    certificate::Certificate,
    parameters::SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL,
    transaction::{self, Anchor, Transaction},
};

use zenith_state::{CoinOwnership, CoinView, SidechainState};

use crate::store::Mempool;
use crate::ReferencedHeights;

/// The objects a sweep removed, handed back for re-relay accounting and
/// wallet eviction notices.
#[derive(Debug, Default)]
pub struct SweepRemoved {
    pub txs: Vec<Arc<Transaction>>,
    pub certs: Vec<Arc<Certificate>>,
}

impl SweepRemoved {
    fn absorb(&mut self, (txs, certs): (Vec<Arc<Transaction>>, Vec<Arc<Certificate>>)) {
        self.txs.extend(txs);
        self.certs.extend(certs);
    }

    fn merge(&mut self, other: SweepRemoved) {
        self.txs.extend(other.txs);
        self.certs.extend(other.certs);
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty() && self.certs.is_empty()
    }
}

impl Mempool {
    /// Remove everything that conflicts with a confirmed transaction:
    /// spenders of the outpoints it spent, revealers of its shielded
    /// nullifiers, consumers of its csw nullifiers; each with descendants.
    pub fn remove_conflicts_of_tx(&mut self, tx: &Transaction) -> SweepRemoved {
        let mut removed = SweepRemoved::default();
        let own_hash = tx.hash();

        for outpoint in tx.spent_outpoints() {
            if let Some(conflict) = self.spender_of(&outpoint) {
                if conflict != own_hash {
                    removed.absorb(self.remove(&conflict, true));
                }
            }
        }
        for nullifier in tx.nullifiers() {
            if let Some(conflict) = self.nullifier_spender(nullifier) {
                if conflict != own_hash {
                    removed.absorb(self.remove(&conflict, true));
                }
            }
        }
        for csw in tx.csw_inputs() {
            let conflict = self
                .scid_entry(&csw.scid)
                .and_then(|entry| entry.csw_nullifiers.get(&csw.nullifier).copied());
            if let Some(conflict) = conflict {
                if conflict != own_hash {
                    removed.absorb(self.remove(&conflict, true));
                }
            }
        }
        removed
    }

    /// Remove everything that conflicts with a confirmed certificate:
    /// spenders of its spent outpoints, and every pool certificate for the
    /// same (scid, epoch) with quality ≤ the confirmed one.
    pub fn remove_conflicts_of_cert(&mut self, cert: &Certificate) -> SweepRemoved {
        let mut removed = SweepRemoved::default();
        let own_hash = cert.hash();

        for outpoint in cert.spent_outpoints() {
            if let Some(conflict) = self.spender_of(&outpoint) {
                if conflict != own_hash {
                    debug!(%conflict, cert = %own_hash, "removing input conflict of cert");
                    removed.absorb(self.remove(&conflict, true));
                }
            }
        }

        let superseded: Vec<transaction::Hash> = self
            .scid_entry(&cert.scid)
            .map(|entry| {
                entry
                    .certs
                    .iter()
                    .filter(|((epoch, quality), _)| {
                        *epoch == cert.epoch_number && *quality <= cert.quality
                    })
                    .map(|(_, hash)| *hash)
                    .collect()
            })
            .unwrap_or_default();

        for hash in superseded {
            if self.contains(&hash) {
                debug!(%hash, confirmed = %own_hash, "removing superseded cert");
                removed.absorb(self.remove(&hash, true));
            }
        }
        removed
    }

    /// Block-connect cleanup for the transaction list: drop the included
    /// transactions (non-recursively), remove their conflicts, clear their
    /// prioritisation, and feed the fee estimator.
    pub fn remove_for_block_txs(
        &mut self,
        txs: &[Arc<Transaction>],
        height: block::Height,
    ) -> SweepRemoved {
        let mut conflicting = SweepRemoved::default();
        let included: Vec<_> = txs
            .iter()
            .filter_map(|tx| self.tx(&tx.hash()).cloned())
            .collect();

        for tx in txs {
            self.remove(&tx.hash(), false);
            conflicting.merge(self.remove_conflicts_of_tx(tx));
            self.clear_prioritisation(&tx.hash());
        }
        self.fee_estimator.process_block(height, &included);
        conflicting
    }

    /// Block-connect cleanup for the certificate list.
    pub fn remove_for_block_certs(&mut self, certs: &[Arc<Certificate>]) -> SweepRemoved {
        let mut conflicting = SweepRemoved::default();
        for cert in certs {
            self.remove(&cert.hash(), false);
            conflicting.merge(self.remove_conflicts_of_cert(cert));
            self.clear_prioritisation(&cert.hash());
        }
        conflicting
    }

    /// Evict every transaction whose joinsplits anchor at a root that a
    /// disconnect invalidated.
    pub fn remove_with_anchor(&mut self, invalid_root: &Anchor) -> SweepRemoved {
        let mut removed = SweepRemoved::default();
        let stale: Vec<transaction::Hash> = self
            .txs()
            .filter(|entry| entry.tx.joinsplits().any(|js| js.anchor == *invalid_root))
            .map(|entry| entry.tx.hash())
            .collect();
        for hash in stale {
            if self.contains(&hash) {
                removed.absorb(self.remove(&hash, true));
            }
        }
        removed
    }

    /// The post-tip-change transaction sweep.
    pub fn remove_stale_transactions<V: CoinView>(
        &mut self,
        view: &V,
        tip_height: block::Height,
    ) -> SweepRemoved {
        let mut stale: HashSet<transaction::Hash> = HashSet::new();

        for entry in self.txs() {
            let tx = &entry.tx;
            let hash = tx.hash();

            if !self.tx_expenditures_are_mature(tx, view, tip_height) {
                stale.insert(hash);
                continue;
            }

            for fwd in tx.forward_transfers() {
                // the view does not encompass the pool, so unconfirmed
                // creations are checked explicitly
                if self.has_sidechain_creation_tx(&fwd.scid) {
                    continue;
                }
                let alive_and_funded = match view.sidechain(&fwd.scid) {
                    Ok(Some(record)) => {
                        record.state() == SidechainState::Alive
                            && fwd.amount >= record.forward_transfer_sc_fee
                    }
                    _ => false,
                };
                if !alive_and_funded {
                    stale.insert(hash);
                    break;
                }
            }

            for mbtr in tx.bwt_requests() {
                if self.has_sidechain_creation_tx(&mbtr.scid) {
                    continue;
                }
                let acceptable = match view.sidechain(&mbtr.scid) {
                    Ok(Some(record)) => {
                        record.state() == SidechainState::Alive
                            && mbtr.sc_fee >= record.mainchain_bwt_request_sc_fee
                    }
                    _ => false,
                };
                if !acceptable {
                    stale.insert(hash);
                    break;
                }
            }

            for csw in tx.csw_inputs() {
                let ceased = matches!(
                    view.sidechain(&csw.scid),
                    Ok(Some(record)) if record.state() == SidechainState::Ceased
                );
                if !ceased {
                    stale.insert(hash);
                    break;
                }
            }
        }

        let mut removed = SweepRemoved::default();
        for hash in stale {
            // dependencies between pool objects mean an earlier removal may
            // have taken this one out already
            if self.contains(&hash) {
                removed.absorb(self.remove(&hash, true));
            }
        }

        removed.merge(self.remove_out_of_balance_csw(view));
        trace!(
            txs = removed.txs.len(),
            certs = removed.certs.len(),
            "stale transaction sweep done"
        );
        removed
    }

    /// The post-tip-change certificate sweep.
    pub fn remove_stale_certificates<V: CoinView, R: ReferencedHeights>(
        &mut self,
        view: &V,
        resolver: &R,
        tip_height: block::Height,
    ) -> SweepRemoved {
        let mut stale: HashSet<transaction::Hash> = HashSet::new();

        for entry in self.certs() {
            let cert = &entry.cert;
            let hash = cert.hash();

            if !self.cert_expenditures_are_mature(cert, view, tip_height) {
                stale.insert(hash);
                continue;
            }

            let record = match view.sidechain(&cert.scid) {
                Ok(Some(record)) => record,
                _ => {
                    stale.insert(hash);
                    continue;
                }
            };

            let referenced_height = if record.is_non_ceasing() {
                match resolver.height_for_cum_commitment(&cert.end_epoch_cum_tree_root) {
                    Some(height) => Some(height),
                    None => {
                        debug!(%hash, "cert lost its reference block, removing");
                        stale.insert(hash);
                        continue;
                    }
                }
            } else {
                None
            };

            let next_height = (tip_height + 1).unwrap_or(tip_height);
            if !record.check_cert_timing(cert.epoch_number, referenced_height, next_height) {
                // a non-ceasing cert is kept when its in-pool predecessor
                // for the previous epoch still establishes the sequence
                let has_predecessor = record.is_non_ceasing()
                    && cert.epoch_number > 0
                    && self.certificate_exists(&cert.scid, cert.epoch_number - 1);
                if !has_predecessor {
                    stale.insert(hash);
                    continue;
                }
            }
        }

        let mut removed = SweepRemoved::default();
        for hash in stale {
            if self.contains(&hash) {
                removed.absorb(self.remove(&hash, true));
            }
        }
        trace!(certs = removed.certs.len(), "stale certificate sweep done");
        removed
    }

    /// Remove csw transactions whose sidechain cannot cover the pool's
    /// running csw total.
    ///
    /// When a sidechain's total is in excess, every csw for that scid is
    /// removed: a value conflict means a broken or malicious circuit, and
    /// picking an arbitrary fitting subset would be spurious precision.
    pub fn remove_out_of_balance_csw<V: CoinView>(&mut self, view: &V) -> SweepRemoved {
        let mut stale: HashSet<transaction::Hash> = HashSet::new();

        let scids: Vec<_> = self
            .scid_entries()
            .map(|(scid, entry)| (*scid, entry.csw_total, entry.csw_nullifiers.len()))
            .collect();

        for (scid, csw_total, csw_count) in scids {
            if csw_total.is_zero() && csw_count == 0 {
                continue;
            }
            let balance = match view.sidechain(&scid) {
                Ok(Some(record)) => record.balance,
                _ => zenith_chain::amount::Amount::zero(),
            };
            if csw_total <= balance && csw_count <= SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL {
                continue;
            }
            if let Some(entry) = self.scid_entry(&scid) {
                stale.extend(entry.csw_nullifiers.values().copied());
            }
        }

        let mut removed = SweepRemoved::default();
        for hash in stale {
            if self.contains(&hash) {
                removed.absorb(self.remove(&hash, true));
            }
        }
        removed
    }

    /// Inputs of a pool transaction must either come from the pool itself
    /// (but never from a certificate: unconfirmed certificate change is
    /// unspendable by transactions), or resolve in the view and be mature
    /// one block past the tip.
    fn tx_expenditures_are_mature<V: CoinView>(
        &self,
        tx: &Transaction,
        view: &V,
        tip_height: block::Height,
    ) -> bool {
        let spend_height = match tip_height + 1 {
            Some(height) => height,
            None => return false,
        };
        for outpoint in tx.spent_outpoints() {
            if self.tx(&outpoint.hash).is_some() {
                continue;
            }
            if self.cert(&outpoint.hash).is_some() {
                debug!(
                    tx = %tx.hash(),
                    cert = %outpoint.hash,
                    "tx spends unconfirmed certificate output, sweeping"
                );
                return false;
            }
            match view.coins(&outpoint.hash) {
                Ok(Some(coin)) => {
                    let locked = matches!(
                        coin.ownership,
                        CoinOwnership::Coinbase | CoinOwnership::Certificate
                    );
                    if locked && !coin.is_output_mature(outpoint.index, spend_height) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Certificates may spend unconfirmed certificate change (it is legal
    /// after a reorg), but never unconfirmed backward transfers.
    fn cert_expenditures_are_mature<V: CoinView>(
        &self,
        cert: &Certificate,
        view: &V,
        tip_height: block::Height,
    ) -> bool {
        let spend_height = match tip_height + 1 {
            Some(height) => height,
            None => return false,
        };
        for outpoint in cert.spent_outpoints() {
            if self.tx(&outpoint.hash).is_some() {
                continue;
            }
            if let Some(entry) = self.cert(&outpoint.hash) {
                if entry.cert.is_backward_transfer(outpoint.index as usize) {
                    return false;
                }
                continue;
            }
            match view.coins(&outpoint.hash) {
                Ok(Some(coin)) => {
                    let locked = matches!(
                        coin.ownership,
                        CoinOwnership::Coinbase | CoinOwnership::Certificate
                    );
                    if locked && !coin.is_output_mature(outpoint.index, spend_height) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}
