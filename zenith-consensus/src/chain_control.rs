//! The chain manager: block connect and disconnect with undo records, the
//! rewind-and-replay reorg driver, and the per-certificate status
//! notifications.
//!
//! All chain mutation happens under `cs_main`; the mempool cleanup that
//! follows a tip change additionally takes `cs_mempool`, always in that
//! order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use zenith_chain::{
    amount::{Amount, NonNegative},
    block::{self, Block},
    certificate::Certificate,
    serialization::sha256d,
    sidechain::{FieldElement, Scid},
    transaction::{Anchor, Transaction},
    WireSerialize,
};

use zenith_mempool::Mempool;
use zenith_state::{
    BlockUndo, BwtState, CertStatusInfo, ChainState, Coin, CoinView, NodeId, SidechainRecord,
    SidechainState, SyncEvent, SyncSender, WriteableCoinView,
};

use crate::check;
use crate::contextual;
use crate::error::{BlockError, CertificateError, TransactionError, ValidationError};
use crate::script_verify;
use crate::subsidy;

/// The globals of the old design, gathered into one value: the two
/// monitors and the block bodies awaiting connection.
pub struct ChainContext<V> {
    /// `cs_main`: the chain state.
    pub chain: Mutex<ChainState<V>>,
    /// `cs_mempool`: the pool. Always taken after `chain`.
    pub mempool: Mutex<Mempool>,
    /// Block bodies by hash. In a full deployment these live in the block
    /// file segments; the map is the working set.
    pub blocks: Mutex<HashMap<block::Hash, Arc<Block>>>,
}

impl<V: WriteableCoinView> ChainContext<V> {
    pub fn new(chain: ChainState<V>) -> ChainContext<V> {
        ChainContext {
            chain: Mutex::new(chain),
            mempool: Mutex::new(Mempool::new()),
            blocks: Mutex::new(HashMap::new()),
        }
    }
}

/// Drives block acceptance and chain reorganization.
pub struct ChainController<V> {
    pub context: Arc<ChainContext<V>>,
    /// Wallet/indexer notification channel.
    pub notifications: Option<SyncSender>,
    /// The secondary-index consumer, when any index is enabled.
    index_writer: Option<Mutex<Box<dyn zenith_state::indexes::IndexWriter>>>,
    /// Index batches by block, kept for reversal on disconnect.
    index_batches: Mutex<HashMap<block::Hash, zenith_state::indexes::IndexBatch>>,
}

impl<V: WriteableCoinView> ChainController<V> {
    pub fn new(context: Arc<ChainContext<V>>) -> ChainController<V> {
        ChainController {
            context,
            notifications: None,
            index_writer: None,
            index_batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifications(mut self, sender: SyncSender) -> Self {
        self.notifications = Some(sender);
        self
    }

    pub fn with_index_writer(
        mut self,
        writer: Box<dyn zenith_state::indexes::IndexWriter>,
    ) -> Self {
        self.index_writer = Some(Mutex::new(writer));
        self
    }

    fn notify(&self, event: SyncEvent) {
        if let Some(sender) = &self.notifications {
            let _ = sender.send(event);
        }
    }

    /// Clear the failure ban on a block, allowing the reorg driver to
    /// reconsider it and its descendants.
    pub fn reconsider_block(&self, hash: &block::Hash) -> Result<(), ValidationError> {
        let mut chain = self.context.chain.lock().expect("cs_main is never poisoned");
        if let Some(node) = chain.index.by_hash(hash) {
            chain.index.clear_failure(node);
            self.activate_best_chain(&mut chain)?;
        }
        Ok(())
    }

    /// Accept a block: context-free checks, index insertion, storage, and
    /// (when it extends the best work) activation.
    pub fn process_block(&self, block: Arc<Block>) -> Result<(), ValidationError> {
        let hash = block.hash();

        let mut chain = self.context.chain.lock().expect("cs_main is never poisoned");

        // context-free CheckBlock
        check::block::check(&block, chain.params.network, chain.params.require_pow)?;

        // the parent must be indexed; orphan blocks are the caller's
        // problem (they go back to the download queue)
        if block.header.previous_block_hash
            != zenith_chain::parameters::GENESIS_PREVIOUS_BLOCK_HASH
            && !chain.index.contains(&block.header.previous_block_hash)
        {
            return Err(BlockError::OrphanBlock(block.header.previous_block_hash).into());
        }

        let node = chain
            .index
            .insert(block.header.clone())
            .map_err(|_| BlockError::InvalidDifficulty)?;
        chain
            .index
            .get_mut(node)
            .status
            .insert(zenith_state::BlockStatus::VALID_TRANSACTIONS);

        self.context
            .blocks
            .lock()
            .expect("block map lock is never poisoned")
            .insert(hash, block);

        metrics::counter!("consensus.block.accepted", 1);
        self.activate_best_chain(&mut chain)
    }

    /// Rewind-and-replay: move the active chain to the best usable tip.
    pub fn activate_best_chain(&self, chain: &mut ChainState<V>) -> Result<(), ValidationError> {
        loop {
            let best = match chain.index.best_candidate_tip() {
                Some(best) => best,
                None => return Ok(()),
            };
            let current = chain.active.tip();
            if Some(best) == current {
                return Ok(());
            }
            if let Some(current) = current {
                if chain.index.get(best).chain_work <= chain.index.get(current).chain_work {
                    return Ok(());
                }
            }

            // 1. the fork point
            let fork = current
                .and_then(|current| chain.index.lowest_common_ancestor(current, best));

            // 2. disconnect down to the fork, innermost-block-first
            let mut disconnected: Vec<Arc<Block>> = Vec::new();
            while let Some(tip) = chain.active.tip() {
                if Some(tip) == fork {
                    break;
                }
                match self.disconnect_tip(chain) {
                    Ok(block) => disconnected.push(block),
                    Err(error) => {
                        return Err(ValidationError::Block(BlockError::ConnectFailed(
                            chain.tip_height().unwrap_or(block::Height(0)),
                            format!("disconnect failed: {}", error),
                        )))
                    }
                }
            }

            // 3. connect along the new branch in height order
            let mut path: Vec<NodeId> = Vec::new();
            let mut walk = Some(best);
            while let Some(node) = walk {
                if Some(node) == fork {
                    break;
                }
                path.push(node);
                walk = chain.index.get(node).parent;
            }
            path.reverse();

            let mut failed = false;
            let mut connected: Vec<Arc<Block>> = Vec::new();
            for node in path {
                let hash = chain.index.get(node).hash;
                let body = self
                    .context
                    .blocks
                    .lock()
                    .expect("block map lock is never poisoned")
                    .get(&hash)
                    .cloned();
                let body = match body {
                    Some(body) => body,
                    // headers past our stored bodies cannot be connected
                    // yet; stop cleanly at the last connectable block
                    None => break,
                };
                if let Err(error) = self.connect_tip(chain, node, &body) {
                    warn!(%hash, %error, "block failed to connect, marking failed");
                    chain.index.mark_failed(node);
                    failed = true;
                    break;
                }
                connected.push(body);
            }

            // 4 & 5. notifications and mempool maintenance
            self.after_tip_change(chain, connected, disconnected);

            if !failed {
                return Ok(());
            }
            // a failure above re-enters the loop, which reorganizes back to
            // the best remaining candidate
        }
    }

    /// Connect one block on top of the active tip.
    pub fn connect_tip(
        &self,
        chain: &mut ChainState<V>,
        node: NodeId,
        block: &Arc<Block>,
    ) -> Result<(), ValidationError> {
        let height = chain.index.get(node).height;
        let hash = chain.index.get(node).hash;

        self.contextual_check_block(chain, node, block, height)?;

        let mut undo = BlockUndo::default();
        let result = self.apply_block(chain, block, height, &mut undo);

        if let Err(error) = result {
            // unwind the partial state from the cache via the in-flight
            // undo
            self.apply_undo(chain, &undo)
                .expect("in-flight undo applies to the state it was built from");
            return Err(error);
        }

        // extend the cumulative sidechain-commitment chain
        let parent_cum = chain
            .active
            .tip()
            .and_then(|tip| chain.index.get(tip).cum_sc_commitment);
        let cum = cumulative_sc_commitment(parent_cum, block);
        chain.index.get_mut(node).cum_sc_commitment = Some(cum);
        chain.index.record_cum_commitment(cum, height);
        undo.cum_sc_commitment = Some(cum);

        chain.coins.set_best_block(hash);
        chain.undos.insert(node, undo);
        chain.active.push(node);
        chain
            .index
            .get_mut(node)
            .status
            .insert(zenith_state::BlockStatus::VALID_CHAIN);

        metrics::counter!("state.committed.block.count", 1);
        metrics::gauge!("state.committed.block.height", height.0 as f64);
        info!(%hash, height = height.0, "connected block");

        self.notify(SyncEvent::TipChanged { hash, height });
        for tx in &block.transactions {
            self.notify(SyncEvent::Transaction {
                transaction: tx.clone(),
                in_block: Some(hash),
            });
        }
        for cert in &block.certificates {
            self.notify(SyncEvent::Certificate {
                certificate: cert.clone(),
                in_block: Some(hash),
            });
        }
        self.emit_cert_status(block);
        self.emit_index_batch(chain, block, hash, height);
        Ok(())
    }

    /// Produce and deliver the secondary-index write batch for a connected
    /// block.
    fn emit_index_batch(
        &self,
        chain: &ChainState<V>,
        block: &Arc<Block>,
        hash: block::Hash,
        height: block::Height,
    ) {
        use zenith_state::indexes::*;

        let writer = match &self.index_writer {
            Some(writer) => writer,
            None => return,
        };

        let mut batch = IndexBatch::default();
        batch.timestamp_entries.push(TimestampIndexEntry {
            timestamp: block.header.time.timestamp(),
            block: hash,
        });

        for (position, tx) in block.transactions.iter().enumerate() {
            batch.tx_entries.push(TxIndexEntry {
                txid: tx.hash(),
                block: hash,
                height,
                position,
            });
            for (input_index, outpoint) in tx.spent_outpoints().enumerate() {
                batch.spent_entries.push(SpentIndexEntry {
                    outpoint,
                    spender: tx.hash(),
                    input_index,
                    height,
                });
            }
            for (output_index, output) in tx.outputs.iter().enumerate() {
                batch.address_entries.push(AddressIndexEntry {
                    script_key: output.lock_script.0.clone(),
                    txid: tx.hash(),
                    output_index: output_index as u32,
                    value: output.value.zatoshi(),
                    height,
                    spending: false,
                });
            }
        }
        for (cert_position, cert) in block.certificates.iter().enumerate() {
            batch.tx_entries.push(TxIndexEntry {
                txid: cert.hash(),
                block: hash,
                height,
                position: block.transactions.len() + cert_position,
            });
            if let Some(coin) = chain.coins.coins(&cert.hash()).ok().flatten() {
                if let Some(maturity) = coin.bwt_maturity_height {
                    batch.maturity_entries.push(MaturityHeightIndexEntry {
                        maturity_height: maturity,
                        cert_hash: cert.hash(),
                    });
                }
            }
        }

        writer
            .lock()
            .expect("index writer lock is never poisoned")
            .block_connected(&batch);
        self.index_batches
            .lock()
            .expect("index batch lock is never poisoned")
            .insert(hash, batch);
    }

    /// Disconnect the active tip, restoring its undo record. Returns the
    /// disconnected block for mempool re-injection.
    pub fn disconnect_tip(
        &self,
        chain: &mut ChainState<V>,
    ) -> Result<Arc<Block>, zenith_state::BoxError> {
        let tip = chain.active.tip().ok_or("no tip to disconnect")?;
        let hash = chain.index.get(tip).hash;
        let height = chain.index.get(tip).height;

        let undo = chain
            .undos
            .remove(&tip)
            .ok_or("missing undo record for tip")?;
        let block = self
            .context
            .blocks
            .lock()
            .expect("block map lock is never poisoned")
            .get(&hash)
            .cloned()
            .ok_or("missing block body for tip")?;

        self.apply_undo(chain, &undo)?;
        if let Some(cum) = undo.cum_sc_commitment {
            chain.index.forget_cum_commitment(&cum);
            chain.index.get_mut(tip).cum_sc_commitment = None;
        }

        chain.active.pop();
        let new_tip_hash = chain
            .active
            .tip()
            .map(|id| chain.index.get(id).hash)
            .unwrap_or(zenith_chain::parameters::GENESIS_PREVIOUS_BLOCK_HASH);
        chain.coins.set_best_block(new_tip_hash);

        if let Some(writer) = &self.index_writer {
            if let Some(batch) = self
                .index_batches
                .lock()
                .expect("index batch lock is never poisoned")
                .remove(&hash)
            {
                writer
                    .lock()
                    .expect("index writer lock is never poisoned")
                    .block_disconnected(&batch);
            }
        }

        debug!(%hash, height = height.0, "disconnected block");
        self.notify(SyncEvent::TipChanged {
            hash: new_tip_hash,
            height: chain.tip_height().unwrap_or(block::Height(0)),
        });
        Ok(block)
    }

    // ---- internals ----------------------------------------------------

    fn contextual_check_block(
        &self,
        chain: &ChainState<V>,
        node: NodeId,
        block: &Arc<Block>,
        height: block::Height,
    ) -> Result<(), ValidationError> {
        check::block::time_is_valid_at(
            &block.header,
            Utc::now(),
            &height,
            &block.hash(),
        )?;

        // median-time-past over the previous 11 blocks
        let mut times = Vec::with_capacity(11);
        let mut walk = chain.index.get(node).parent;
        while let Some(parent) = walk {
            if times.len() == 11 {
                break;
            }
            times.push(chain.index.get(parent).header.time);
            walk = chain.index.get(parent).parent;
        }
        check::block::time_is_after_median_time_past(&block.header, &times)?;

        check::block::height_is_embedded_in_coinbase(block, height)?;
        Ok(())
    }

    fn apply_block(
        &self,
        chain: &mut ChainState<V>,
        block: &Arc<Block>,
        height: block::Height,
        undo: &mut BlockUndo,
    ) -> Result<(), ValidationError> {
        let mut fees = Amount::<NonNegative>::zero();

        // transactions in order, coinbase first
        for (position, tx) in block.transactions.iter().enumerate() {
            if position == 0 {
                self.apply_coinbase(chain, tx, height, undo)?;
                continue;
            }
            let fee = self.apply_transaction(chain, tx, height, undo)?;
            fees = (fee + fees).map_err(TransactionError::from)?;
        }

        // certificates after all transactions, canonical order
        let mut top_quality_in_block: HashMap<(Scid, u32), u64> = HashMap::new();
        for cert in &block.certificates {
            let key = (cert.scid, cert.epoch_number);
            let entry = top_quality_in_block.entry(key).or_insert(0);
            *entry = (*entry).max(cert.quality);
        }
        for cert in &block.certificates {
            let top_quality =
                top_quality_in_block[&(cert.scid, cert.epoch_number)] == cert.quality;
            let fee = self.apply_certificate(chain, cert, height, top_quality, undo)?;
            fees = (fee + fees).map_err(TransactionError::from)?;
        }

        // scheduled sidechain events at this height fire last
        self.process_sidechain_events(chain, height, undo)?;

        // ledger conservation: the coinbase claims at most the miner share
        // plus the community-fund allowance plus the block fees
        let coinbase_out = block.transactions[0]
            .value_out()
            .map_err(TransactionError::from)?;
        let miner = subsidy::miner_subsidy(height).map_err(TransactionError::from)?;
        let fund = subsidy::community_fund(height).map_err(TransactionError::from)?;
        let allowed = ((miner + fund).map_err(TransactionError::from)? + fees)
            .map_err(TransactionError::from)?;
        if coinbase_out > allowed {
            return Err(BlockError::BadSubsidy.into());
        }

        // distribution: on networks with an active fund, the coinbase must
        // dedicate an output of exactly the allowance to it
        if chain.params.community_fund_active
            && !fund.is_zero()
            && subsidy::find_output_with_amount(&block.transactions[0], fund).is_empty()
        {
            return Err(BlockError::BadSubsidy.into());
        }

        Ok(())
    }

    fn apply_coinbase(
        &self,
        chain: &mut ChainState<V>,
        tx: &Arc<Transaction>,
        height: block::Height,
        undo: &mut BlockUndo,
    ) -> Result<(), ValidationError> {
        let txid = tx.hash();
        let before = chain
            .coins
            .coins(&txid)
            .map_err(|error| operational(&error))?;
        if before.is_some() {
            return Err(BlockError::DuplicateTransaction.into());
        }
        undo.snapshot_coin(txid, before);
        chain.coins.put_coin(txid, Coin::from_tx(tx, height));
        Ok(())
    }

    /// Replay one transaction against the evolving view: spend its inputs,
    /// create its coins, register shielded and sidechain effects. Returns
    /// the fee.
    fn apply_transaction(
        &self,
        chain: &mut ChainState<V>,
        tx: &Arc<Transaction>,
        height: block::Height,
        undo: &mut BlockUndo,
    ) -> Result<Amount<NonNegative>, ValidationError> {
        let txid = tx.hash();

        // availability and maturity against the evolving view; missing
        // inputs are a hard failure at connect time
        let tip_height = (height - 1).unwrap_or(block::Height(0));
        let value_in = match contextual::inputs_are_available(
            tx.spent_outpoints(),
            &chain.coins,
            tip_height,
        ) {
            Ok(value) => value,
            Err(ValidationError::Transaction(TransactionError::MissingInputs(_))) => {
                return Err(TransactionError::Conflict.into());
            }
            Err(error) => return Err(error),
        };
        contextual::shielded_requirements(tx, &chain.coins)?;

        // consensus-set script checks
        let checks = script_verify::collect_checks(
            tx,
            &chain.coins,
            zenith_script::VerificationFlags::consensus(),
        )?;
        let history = ConnectedChainHistory { chain };
        script_verify::run_inline(&checks, &history)?;

        // sidechain rules against the evolving view (no mempool at
        // connect time)
        let empty_pool = Mempool::new();
        contextual::transaction_sidechain_rules(tx, &chain.coins, &empty_pool, &chain.params)?;

        // spend the inputs
        for outpoint in tx.spent_outpoints() {
            let before = chain
                .coins
                .coins(&outpoint.hash)
                .map_err(|error| operational(&error))?;
            undo.snapshot_coin(outpoint.hash, before);
            chain
                .coins
                .spend_output(&outpoint)
                .map_err(|_| ValidationError::Transaction(TransactionError::Conflict))?;
        }

        // create the coins
        let before = chain
            .coins
            .coins(&txid)
            .map_err(|error| operational(&error))?;
        if before.as_ref().map(|coin| !coin.is_fully_spent()).unwrap_or(false) {
            return Err(BlockError::DuplicateTransaction.into());
        }
        undo.snapshot_coin(txid, before);
        chain.coins.put_coin(txid, Coin::from_tx(tx, height));

        // shielded effects
        for nullifier in tx.nullifiers() {
            chain.coins.set_nullifier(*nullifier, true);
            undo.nullifiers_added.push(*nullifier);
        }
        if tx.joinsplits().next().is_some() {
            let anchor = block_anchor(tx);
            chain.coins.add_anchor(anchor);
            undo.anchors_added.push(anchor);
        }

        // sidechain effects
        self.apply_tx_sidechain_effects(chain, tx, height, undo)?;

        compute_tx_fee(tx, value_in)
    }

    fn apply_tx_sidechain_effects(
        &self,
        chain: &mut ChainState<V>,
        tx: &Arc<Transaction>,
        height: block::Height,
        undo: &mut BlockUndo,
    ) -> Result<(), ValidationError> {
        let maturity = chain.params.sc_coin_maturity;

        for (scid, creation) in tx.sidechain_creations() {
            undo.snapshot_sidechain(scid, None);
            let mut record = SidechainRecord::from_creation(tx.hash(), creation, height);

            // the creation amount matures like any forward transfer
            let mature_at = (height + maturity).ok_or(TransactionError::ValueOutOfRange)?;
            record
                .credit_immature(mature_at, creation.amount)
                .map_err(TransactionError::from)?;
            self.schedule_event(chain, undo, mature_at, scid);

            if let Some(ceasing) = record.current_ceasing_height() {
                self.schedule_event(chain, undo, ceasing, scid);
            }
            chain.coins.put_sidechain(scid, record);
        }

        for fwd in tx.forward_transfers() {
            let mut record = self.load_sidechain(chain, &fwd.scid, undo)?;
            let mature_at = (height + maturity).ok_or(TransactionError::ValueOutOfRange)?;
            record
                .credit_immature(mature_at, fwd.amount)
                .map_err(TransactionError::from)?;
            self.schedule_event(chain, undo, mature_at, fwd.scid);
            chain.coins.put_sidechain(fwd.scid, record);
        }

        // mbtr is balance-preserving; its fee was counted in value flows

        for csw in tx.csw_inputs() {
            let mut record = self.load_sidechain(chain, &csw.scid, undo)?;
            if record.state() != SidechainState::Ceased {
                return Err(
                    crate::error::SidechainRuleError::ScidNotCeased(csw.scid).into()
                );
            }
            record
                .apply_csw(csw.value)
                .map_err(|_| crate::error::SidechainRuleError::InsufficientScidFunds(csw.scid))?;
            chain.coins.put_sidechain(csw.scid, record);
            chain.coins.set_csw_nullifier(csw.scid, csw.nullifier, true);
            undo.csw_nullifiers_added.push((csw.scid, csw.nullifier));
        }

        Ok(())
    }

    fn apply_certificate(
        &self,
        chain: &mut ChainState<V>,
        cert: &Arc<Certificate>,
        height: block::Height,
        top_quality: bool,
        undo: &mut BlockUndo,
    ) -> Result<Amount<NonNegative>, ValidationError> {
        let cert_hash = cert.hash();
        let tip_height = (height - 1).unwrap_or(block::Height(0));

        let value_in = match contextual::inputs_are_available(
            cert.spent_outpoints(),
            &chain.coins,
            tip_height,
        ) {
            Ok(value) => value,
            Err(ValidationError::Transaction(TransactionError::MissingInputs(_))) => {
                // a certificate input that does not resolve here can only
                // be the output of a same-block certificate it must not
                // depend on; consensus rejects the block
                return Err(CertificateError::DependsOnBetterQuality.into());
            }
            Err(error) => return Err(error),
        };

        let mut record = self.load_sidechain(chain, &cert.scid, undo)?;
        if record.state() != SidechainState::Alive {
            return Err(crate::error::SidechainRuleError::ScidNotAlive(cert.scid).into());
        }

        let referenced_height = if record.is_non_ceasing() {
            match chain
                .index
                .height_for_cum_commitment(&cert.end_epoch_cum_tree_root)
            {
                Some(height) => Some(height),
                None => return Err(CertificateError::UnknownCumCommTree.into()),
            }
        } else {
            None
        };

        // spend inputs, create coins (bwts voided unless top quality)
        for outpoint in cert.spent_outpoints() {
            let before = chain
                .coins
                .coins(&outpoint.hash)
                .map_err(|error| operational(&error))?;
            undo.snapshot_coin(outpoint.hash, before);
            chain
                .coins
                .spend_output(&outpoint)
                .map_err(|_| ValidationError::Transaction(TransactionError::Conflict))?;
        }
        let bwt_maturity = record
            .current_ceasing_height()
            .unwrap_or_else(|| {
                // non-ceasing backward transfers mature with ordinary coin
                // maturity
                (height + chain.params.sc_coin_maturity).unwrap_or(height)
            });
        let before = chain
            .coins
            .coins(&cert_hash)
            .map_err(|error| operational(&error))?;
        undo.snapshot_coin(cert_hash, before);
        chain
            .coins
            .put_coin(cert_hash, Coin::from_cert(cert, height, bwt_maturity, top_quality));

        if top_quality {
            let same_epoch_replacement = record
                .last_cert
                .as_ref()
                .map(|last| last.epoch == cert.epoch_number)
                .unwrap_or(false);

            if same_epoch_replacement {
                // superseding a previously confirmed certificate of the
                // same epoch: only strictly higher quality may do so
                let last = record.last_cert.clone().expect("checked above");
                if cert.quality <= last.quality {
                    return Err(CertificateError::QualityConflict.into());
                }
                // demote the old top: void its unspent backward transfers
                // and return their value to the sidechain balance
                if let Some(mut old_coin) = chain
                    .coins
                    .coins(&last.hash)
                    .map_err(|error| operational(&error))?
                {
                    undo.snapshot_coin(last.hash, Some(old_coin.clone()));
                    let restored = old_coin
                        .void_backward_transfers()
                        .map_err(TransactionError::from)?;
                    chain.coins.put_coin(last.hash, old_coin);
                    record.balance = (record.balance + restored)
                        .map_err(TransactionError::from)?;
                    self.notify(SyncEvent::CertStatus(CertStatusInfo {
                        scid: cert.scid,
                        cert_hash: last.hash,
                        epoch: last.epoch,
                        quality: last.quality,
                        bwt_state: BwtState::BwtOff,
                    }));
                }
            } else if !record.check_cert_timing(cert.epoch_number, referenced_height, height) {
                return Err(CertificateError::BadTiming.into());
            }

            // reschedule the cease deadline past the new epoch
            if let Some(old_deadline) = record.current_ceasing_height() {
                self.cancel_event(chain, undo, old_deadline, cert.scid);
            }
            record
                .apply_certificate(cert, height, referenced_height)
                .map_err(|_| {
                    crate::error::SidechainRuleError::InsufficientScidFunds(cert.scid)
                })?;
            if let Some(new_deadline) = record.current_ceasing_height() {
                self.schedule_event(chain, undo, new_deadline, cert.scid);
            }
            chain.coins.put_sidechain(cert.scid, record);
        }

        let change = cert.change_total().map_err(TransactionError::from)?;
        (value_in - change)
            .map_err(|_| TransactionError::ValueOutOfRange.into())
    }

    /// Fire the events scheduled at `height`: mature immature amounts,
    /// and cease sidechains whose deadline this is.
    fn process_sidechain_events(
        &self,
        chain: &mut ChainState<V>,
        height: block::Height,
        undo: &mut BlockUndo,
    ) -> Result<(), ValidationError> {
        let scids = chain
            .coins
            .sidechain_events_at(height)
            .map_err(|error| operational(&error))?;

        for scid in scids {
            let mut record = self.load_sidechain(chain, &scid, undo)?;

            record
                .mature_amounts_at(height)
                .map_err(TransactionError::from)?;

            if record.current_ceasing_height() == Some(height)
                && record.state() == SidechainState::Alive
            {
                info!(%scid, height = height.0, "sidechain ceased");
                record.cease(height);
            }

            chain.coins.put_sidechain(scid, record);
            self.cancel_event(chain, undo, height, scid);
        }
        Ok(())
    }

    fn load_sidechain(
        &self,
        chain: &mut ChainState<V>,
        scid: &Scid,
        undo: &mut BlockUndo,
    ) -> Result<SidechainRecord, ValidationError> {
        let record = chain
            .coins
            .sidechain(scid)
            .map_err(|error| operational(&error))?
            .ok_or(crate::error::SidechainRuleError::ScidNotFound(*scid))?;
        undo.snapshot_sidechain(*scid, Some(record.clone()));
        Ok(record)
    }

    fn schedule_event(
        &self,
        chain: &mut ChainState<V>,
        undo: &mut BlockUndo,
        height: block::Height,
        scid: Scid,
    ) {
        chain.coins.add_sidechain_event(height, scid);
        undo.events_added.push((height, scid));
    }

    fn cancel_event(
        &self,
        chain: &mut ChainState<V>,
        undo: &mut BlockUndo,
        height: block::Height,
        scid: Scid,
    ) {
        chain.coins.remove_sidechain_event(height, scid);
        undo.events_removed.push((height, scid));
    }

    /// Restore the state snapshots of one undo record.
    fn apply_undo(
        &self,
        chain: &mut ChainState<V>,
        undo: &BlockUndo,
    ) -> Result<(), zenith_state::BoxError> {
        for (txid, before) in &undo.coins_before {
            match before {
                Some(coin) => chain.coins.put_coin(*txid, coin.clone()),
                None => chain.coins.remove_coin(txid),
            }
        }
        for (scid, before) in &undo.sidechains_before {
            match before {
                Some(record) => chain.coins.put_sidechain(*scid, record.clone()),
                None => chain.coins.remove_sidechain(scid),
            }
        }
        for nullifier in &undo.nullifiers_added {
            chain.coins.set_nullifier(*nullifier, false);
        }
        for anchor in &undo.anchors_added {
            chain.coins.remove_anchor(*anchor);
        }
        for (scid, nullifier) in &undo.csw_nullifiers_added {
            chain.coins.set_csw_nullifier(*scid, *nullifier, false);
        }
        for (height, scid) in &undo.events_added {
            chain.coins.remove_sidechain_event(*height, *scid);
        }
        for (height, scid) in &undo.events_removed {
            chain.coins.add_sidechain_event(*height, *scid);
        }
        Ok(())
    }

    /// Step 4/5 of a tip change: prune the mempool against the new chain
    /// and re-inject what the disconnect evicted.
    fn after_tip_change(
        &self,
        chain: &mut ChainState<V>,
        connected: Vec<Arc<Block>>,
        disconnected: Vec<Arc<Block>>,
    ) {
        let tip_height = match chain.tip_height() {
            Some(height) => height,
            None => return,
        };

        let mut mempool = self
            .context
            .mempool
            .lock()
            .expect("cs_mempool is never poisoned");

        // per-block conflict removal for everything that just connected
        for block in &connected {
            mempool.remove_for_block_txs(&block.transactions, tip_height);
            mempool.remove_for_block_certs(&block.certificates);
        }

        // disconnected objects re-enter the pool through the unchecked
        // path; the sweep below evicts anything the new chain invalidates
        for block in &disconnected {
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                let entry = zenith_mempool::TxEntry {
                    tx: tx.clone(),
                    fee: Amount::zero(),
                    size: tx.len(),
                    time: chrono::Utc::now().timestamp(),
                    start_priority: 0.0,
                    input_value: Amount::zero(),
                    height: tip_height,
                };
                let _ = mempool.add_tx_unchecked(entry);
            }
            for cert in &block.certificates {
                let entry = zenith_mempool::CertEntry {
                    cert: cert.clone(),
                    fee: Amount::zero(),
                    size: 1_000,
                    time: chrono::Utc::now().timestamp(),
                    height: tip_height,
                };
                let _ = mempool.add_cert_unchecked(entry);
            }
        }

        mempool.remove_stale_transactions(&chain.coins, tip_height);
        mempool.remove_stale_certificates(&chain.coins, &chain.index, tip_height);

        // replay-protected scripts re-resolve against the new chain: a
        // reorg may have replaced the block a suffix commits to
        let history = ConnectedChainHistory { chain };
        let stale_replay: Vec<_> = mempool
            .txs()
            .filter(|entry| {
                entry.tx.outputs.iter().any(|output| {
                    zenith_script::standard::checkblockatheight_params(&output.lock_script)
                        .map(|params| {
                            zenith_script::standard::check_replay_protection(&params, &history)
                                .is_err()
                        })
                        .unwrap_or(false)
                })
            })
            .map(|entry| entry.tx.hash())
            .collect();
        for hash in stale_replay {
            debug!(%hash, "replay-protection reference changed, evicting");
            mempool.remove(&hash, true);
        }

        metrics::gauge!("mempool.total.bytes", mempool.total_bytes() as f64);
    }

    fn emit_cert_status(&self, block: &Arc<Block>) {
        let mut top_quality_in_block: HashMap<(Scid, u32), u64> = HashMap::new();
        for cert in &block.certificates {
            let key = (cert.scid, cert.epoch_number);
            let entry = top_quality_in_block.entry(key).or_insert(0);
            *entry = (*entry).max(cert.quality);
        }
        for cert in &block.certificates {
            let top = top_quality_in_block[&(cert.scid, cert.epoch_number)] == cert.quality;
            self.notify(SyncEvent::CertStatus(CertStatusInfo {
                scid: cert.scid,
                cert_hash: cert.hash(),
                epoch: cert.epoch_number,
                quality: cert.quality,
                bwt_state: if top { BwtState::BwtOn } else { BwtState::BwtOff },
            }));
        }
    }
}

/// `ChainHistory` over a `ChainState`, used for consensus-time
/// replay-protection evaluation.
struct ConnectedChainHistory<'a, V> {
    chain: &'a ChainState<V>,
}

impl<'a, V: WriteableCoinView> zenith_script::ChainHistory for ConnectedChainHistory<'a, V> {
    fn block_hash_at(&self, height: block::Height) -> Option<block::Hash> {
        self.chain.hash_at(height)
    }

    fn tip_height(&self) -> block::Height {
        self.chain.tip_height().unwrap_or(block::Height(0))
    }
}

fn compute_tx_fee(
    tx: &Transaction,
    value_in_transparent: Amount<NonNegative>,
) -> Result<Amount<NonNegative>, ValidationError> {
    let intrinsic = tx.intrinsic_balance().map_err(TransactionError::from)?;
    (value_in_transparent + intrinsic)
        .map_err(|_| TransactionError::ValueOutOfRange.into())
}

/// The commitment-tree anchor a shielded transaction introduces: a digest
/// of its note commitments chained onto the transaction id.
fn block_anchor(tx: &Arc<Transaction>) -> Anchor {
    let mut preimage = Vec::new();
    preimage.extend_from_slice(&tx.hash().0);
    for joinsplit in tx.joinsplits() {
        for commitment in &joinsplit.commitments {
            preimage.extend_from_slice(&commitment.0);
        }
    }
    Anchor(sha256d::digest(&preimage))
}

/// The cumulative sidechain-commitment hash of a block: the parent's value
/// chained with a digest of the block's sidechain-relevant content.
fn cumulative_sc_commitment(parent: Option<FieldElement>, block: &Arc<Block>) -> FieldElement {
    let mut preimage = Vec::new();
    if let Some(parent) = parent {
        preimage.extend_from_slice(&parent.0);
    }
    block
        .header
        .merkle_root
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    FieldElement(sha256d::digest(&preimage))
}

fn operational(error: &zenith_state::BoxError) -> ValidationError {
    warn!(%error, "state read failed during connect");
    // surfaced as an invalid-with-corruption verdict by the caller; the
    // distinction is carried in ValidationState, not here
    ValidationError::Block(BlockError::ConnectFailed(
        block::Height(0),
        error.to_string(),
    ))
}
