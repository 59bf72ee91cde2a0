//! The mempool layer of the coin view stack.
//!
//! Wraps any inner view and materializes unconfirmed objects as ephemeral
//! coins at `MEMPOOL_HEIGHT`. Transactions expose all outputs unspent;
//! certificates expose backward transfers only when they are the pool's
//! top-quality certificate for their sidechain. Sidechain lookups compose:
//! unconfirmed creations are materialized, confirmed records are adjusted
//! by the pool's csw totals and (for non-ceasing sidechains) by the pool's
//! top-quality certificate.

use tracing::trace;

use zenith_chain::{
    block,
    parameters::MEMPOOL_HEIGHT,
    sidechain::{FieldElement, Scid},
    transaction::{self, Nullifier},
};

use zenith_state::{
    sidechain::cert_data_hash, BoxError, Coin, CoinView, SidechainRecord,
};

use crate::store::Mempool;
use crate::ReferencedHeights;

/// A coin view that overlays the mempool over an inner view.
pub struct MempoolCoinView<'a, V, R> {
    base: &'a V,
    mempool: &'a Mempool,
    resolver: &'a R,
}

impl<'a, V: CoinView, R: ReferencedHeights> MempoolCoinView<'a, V, R> {
    pub fn new(base: &'a V, mempool: &'a Mempool, resolver: &'a R) -> Self {
        MempoolCoinView {
            base,
            mempool,
            resolver,
        }
    }
}

impl<'a, V: CoinView, R: ReferencedHeights> CoinView for MempoolCoinView<'a, V, R> {
    fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coin>, BoxError> {
        // A pool entry always wins: it cannot conflict with the inner view
        // and it cannot have pruned outputs.
        if let Some(entry) = self.mempool.tx(txid) {
            trace!(%txid, "materializing coins for pool tx");
            return Ok(Some(Coin::from_tx(&entry.tx, block::Height(MEMPOOL_HEIGHT))));
        }
        if let Some(entry) = self.mempool.cert(txid) {
            let top_quality = self
                .mempool
                .scid_entry(&entry.cert.scid)
                .and_then(|scid_entry| scid_entry.top_quality_cert())
                == Some(*txid);
            trace!(%txid, top_quality, "materializing coins for pool cert");
            return Ok(Some(Coin::from_cert(
                &entry.cert,
                block::Height(MEMPOOL_HEIGHT),
                block::Height(MEMPOOL_HEIGHT),
                top_quality,
            )));
        }
        match self.base.coins(txid)? {
            Some(coin) if !coin.is_fully_spent() => Ok(Some(coin)),
            _ => Ok(None),
        }
    }

    fn have_coins(&self, txid: &transaction::Hash) -> Result<bool, BoxError> {
        Ok(self.mempool.contains(txid) || self.base.have_coins(txid)?)
    }

    fn nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool, BoxError> {
        Ok(self.mempool.nullifier_spender(nullifier).is_some()
            || self.base.nullifier_spent(nullifier)?)
    }

    fn have_anchor(&self, anchor: &transaction::Anchor) -> Result<bool, BoxError> {
        self.base.have_anchor(anchor)
    }

    fn sidechain(&self, scid: &Scid) -> Result<Option<SidechainRecord>, BoxError> {
        let mut record = if self.mempool.has_sidechain_creation_tx(scid) {
            // build the record from the unconfirmed creation
            let creation_hash = self
                .mempool
                .scid_entry(scid)
                .and_then(|entry| entry.creation_tx)
                .expect("has_sidechain_creation_tx checked");
            let creation_entry = self
                .mempool
                .tx(&creation_hash)
                .expect("creation tx is stored");
            let creation = creation_entry
                .tx
                .sidechain_creations()
                .find(|(id, _)| id == scid)
                .map(|(_, creation)| creation.clone());
            match creation {
                Some(creation) => {
                    SidechainRecord::from_unconfirmed_creation(creation_hash, &creation)
                }
                None => return Ok(None),
            }
        } else {
            match self.base.sidechain(scid)? {
                Some(record) => record,
                None => return Ok(None),
            }
        };

        if let Some(scid_entry) = self.mempool.scid_entry(scid) {
            // unconfirmed csw reduces the visible balance
            if !scid_entry.csw_total.is_zero() {
                record.balance = (record.balance - scid_entry.csw_total)
                    .unwrap_or_else(|_| zenith_chain::amount::Amount::zero());
            }

            // unconfirmed certificates update the dynamic summary, but only
            // for non-ceasing sidechains: they may carry later epochs
            if record.is_non_ceasing() {
                if let Some(top_hash) = scid_entry.top_quality_cert() {
                    let top = &self
                        .mempool
                        .cert(&top_hash)
                        .expect("cert table entries are stored")
                        .cert;
                    if let Some(referenced) = self
                        .resolver
                        .height_for_cum_commitment(&top.end_epoch_cum_tree_root)
                    {
                        record.last_referenced_height = Some(referenced);
                    }
                    record.last_cert = Some(zenith_state::LastCertSummary {
                        hash: top.hash(),
                        epoch: top.epoch_number,
                        quality: top.quality,
                        referenced_epoch: top.epoch_number,
                        data_hash: cert_data_hash(top),
                        forward_transfer_sc_fee: top.forward_transfer_sc_fee,
                        mainchain_bwt_request_sc_fee: top.mainchain_bwt_request_sc_fee,
                    });
                    record.forward_transfer_sc_fee = top.forward_transfer_sc_fee;
                    record.mainchain_bwt_request_sc_fee = top.mainchain_bwt_request_sc_fee;
                    // the inclusion height is a chain fact; the pool cannot
                    // move it
                }
            }
        }

        Ok(Some(record))
    }

    fn have_sidechain(&self, scid: &Scid) -> Result<bool, BoxError> {
        Ok(self.mempool.has_sidechain_creation_tx(scid) || self.base.have_sidechain(scid)?)
    }

    fn have_csw_nullifier(
        &self,
        scid: &Scid,
        nullifier: &FieldElement,
    ) -> Result<bool, BoxError> {
        Ok(self.mempool.have_csw_nullifier(scid, nullifier)
            || self.base.have_csw_nullifier(scid, nullifier)?)
    }

    fn sidechain_events_at(&self, height: block::Height) -> Result<Vec<Scid>, BoxError> {
        self.base.sidechain_events_at(height)
    }

    fn best_block(&self) -> Result<Option<block::Hash>, BoxError> {
        self.base.best_block()
    }
}
