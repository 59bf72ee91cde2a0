//! Mempool store tests: index closure, dependency tracking, certificate
//! quality conflicts, csw caps, and the stale sweeps.

use std::convert::TryInto;
use std::sync::Arc;

use zenith_chain::{
    amount::Amount,
    block,
    certificate::{BackwardTransfer, Certificate},
    sidechain::{FieldElement, ScProof, ScVk, Scid},
    transaction::{
        CswInput, ForwardTransferOutput, LockTime, SidechainCreationOutput, SidechainPayload,
        Transaction, SC_TX_VERSION,
    },
    transparent::{Input, OutPoint, Output, Script},
};

use zenith_state::{MemoryState, SidechainRecord, StateDelta, WriteableCoinView};

use super::*;

fn entry_for(tx: Transaction) -> TxEntry {
    let size = tx.len();
    TxEntry {
        tx: Arc::new(tx),
        fee: 10_000i64.try_into().unwrap(),
        size,
        time: 0,
        start_priority: 0.0,
        input_value: 0i64.try_into().unwrap(),
        height: block::Height(100),
    }
}

fn cert_entry_for(cert: Certificate) -> CertEntry {
    CertEntry {
        cert: Arc::new(cert),
        fee: 10_000i64.try_into().unwrap(),
        size: 1_000,
        time: 0,
        height: block::Height(100),
    }
}

fn spend(source: transaction::Hash, index: u32, salt: u8) -> Transaction {
    Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: source,
                index,
            },
            unlock_script: Script(vec![salt]),
            sequence: 0,
        }],
        vec![Output {
            value: 5_000i64.try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

fn creation_tx(epoch_len: u32, salt: u8) -> Transaction {
    let mut tx = Transaction::new(
        SC_TX_VERSION,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: transaction::Hash([salt; 32]),
                index: 0,
            },
            unlock_script: Script(vec![salt]),
            sequence: 0,
        }],
        vec![],
        LockTime::unlocked(),
    );
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![SidechainCreationOutput {
            version: 2,
            withdrawal_epoch_length: epoch_len,
            amount: 100_000_000i64.try_into().unwrap(),
            address: FieldElement([salt; 32]),
            custom_data: vec![],
            constant: None,
            cert_vk: ScVk(vec![1; 8]),
            ceased_vk: Some(ScVk(vec![2; 8])),
            field_element_config: vec![],
            bit_vector_config: vec![],
            forward_transfer_sc_fee: Amount::zero(),
            mainchain_bwt_request_sc_fee: Amount::zero(),
            mainchain_bwt_request_data_length: 0,
        }],
        forward_transfers: vec![],
        bwt_requests: vec![],
        csw_inputs: vec![],
    });
    tx
}

fn fwd_tx(scid: Scid, amount: i64, salt: u8) -> Transaction {
    let mut tx = Transaction::new(
        SC_TX_VERSION,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: transaction::Hash([salt; 32]),
                index: 1,
            },
            unlock_script: Script(vec![salt]),
            sequence: 0,
        }],
        vec![],
        LockTime::unlocked(),
    );
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![],
        forward_transfers: vec![ForwardTransferOutput {
            scid,
            amount: amount.try_into().unwrap(),
            address: FieldElement([salt; 32]),
            mc_return_address: [salt; 20],
        }],
        bwt_requests: vec![],
        csw_inputs: vec![],
    });
    tx
}

fn csw_tx(scid: Scid, value: i64, nullifier_salt: u8) -> Transaction {
    let mut tx = Transaction::new(SC_TX_VERSION, vec![], vec![], LockTime::unlocked());
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![],
        forward_transfers: vec![],
        bwt_requests: vec![],
        csw_inputs: vec![CswInput {
            scid,
            value: value.try_into().unwrap(),
            nullifier: FieldElement([nullifier_salt; 32]),
            pub_key_hash: [nullifier_salt; 20],
            proof: ScProof(vec![1]),
            act_cert_data_hash: None,
            ceasing_cum_tree_hash: FieldElement([9; 32]),
            redeem_script: Script(vec![0x51]),
        }],
    });
    tx
}

fn cert(scid: Scid, epoch: u32, quality: u64, salt: u8) -> Certificate {
    Certificate::new(
        scid,
        epoch,
        quality,
        FieldElement([salt; 32]),
        ScProof(vec![salt]),
        vec![],
        vec![],
        vec![Output {
            value: 1_000i64.try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        vec![BackwardTransfer {
            value: 50_000i64.try_into().unwrap(),
            pk_dest: [salt; 20],
        }],
        Amount::zero(),
        Amount::zero(),
    )
}

fn ceased_record(scid_salt: u8, balance: i64) -> (Scid, SidechainRecord) {
    let creation = creation_tx(10, scid_salt);
    let (scid, out) = creation.sidechain_creations().next().unwrap();
    let (scid, out) = (scid, out.clone());
    let mut record =
        SidechainRecord::from_creation(creation.hash(), &out, block::Height(1));
    record
        .credit_immature(block::Height(2), balance.try_into().unwrap())
        .unwrap();
    record.mature_amounts_at(block::Height(2)).unwrap();
    record.cease(block::Height(20));
    (scid, record)
}

#[test]
fn add_and_remove_leave_no_dangling_indexes() {
    let mut pool = Mempool::new();

    let parent = spend(transaction::Hash([1; 32]), 0, 1);
    let parent_hash = parent.hash();
    pool.add_tx_unchecked(entry_for(parent)).unwrap();

    let child = spend(parent_hash, 0, 2);
    let child_hash = child.hash();
    pool.add_tx_unchecked(entry_for(child)).unwrap();

    pool.check_invariants();

    let (removed, _) = pool.remove(&parent_hash, true);
    assert_eq!(removed.len(), 2);
    assert!(!pool.contains(&parent_hash));
    assert!(!pool.contains(&child_hash));
    assert!(pool.is_empty());
    pool.check_invariants();
}

#[test]
fn creation_to_fwd_dependency_edges() {
    let mut pool = Mempool::new();

    let creation = creation_tx(10, 3);
    let (scid, _) = creation.sidechain_creations().next().unwrap();
    let creation_hash = creation.hash();
    pool.add_tx_unchecked(entry_for(creation)).unwrap();

    let fwd = fwd_tx(scid, 1_000_000, 4);
    let fwd_hash = fwd.hash();
    pool.add_tx_unchecked(entry_for(fwd)).unwrap();

    assert_eq!(
        pool.direct_dependencies_of(&fwd_hash),
        vec![creation_hash]
    );
    assert_eq!(
        pool.dependents_of(&creation_hash),
        vec![fwd_hash]
    );

    // removing the creation recursively removes the forward transfer
    let (removed, _) = pool.remove(&creation_hash, true);
    assert_eq!(removed.len(), 2);
    assert!(pool.is_empty());
    pool.check_invariants();
}

#[test]
fn incoming_tx_conflicts_are_detected() {
    let mut pool = Mempool::new();
    let tx = spend(transaction::Hash([5; 32]), 0, 5);
    pool.add_tx_unchecked(entry_for(tx)).unwrap();

    // same outpoint, different script
    let double_spend = spend(transaction::Hash([5; 32]), 0, 6);
    assert!(!pool.check_incoming_tx_conflicts(&double_spend));

    let unrelated = spend(transaction::Hash([7; 32]), 0, 7);
    assert!(pool.check_incoming_tx_conflicts(&unrelated));
}

#[test]
fn cert_quality_table_orders_by_epoch_then_quality() {
    let mut pool = Mempool::new();
    let scid = Scid([8; 32]);

    pool.add_cert_unchecked(cert_entry_for(cert(scid, 0, 5, 1))).unwrap();
    let c2 = cert(scid, 0, 10, 2);
    let c2_hash = c2.hash();
    pool.add_cert_unchecked(cert_entry_for(c2)).unwrap();

    let entry = pool.scid_entry(&scid).unwrap();
    assert_eq!(entry.top_quality_cert(), Some(c2_hash));
    assert!(pool.certificate_exists(&scid, 0));
    assert!(!pool.certificate_exists(&scid, 1));
}

#[test]
fn confirmed_cert_removes_lower_or_equal_quality_pool_certs() {
    let mut pool = Mempool::new();
    let scid = Scid([8; 32]);

    let c1 = cert(scid, 0, 5, 1);
    let c2 = cert(scid, 0, 10, 2);
    let c2_hash = c2.hash();
    pool.add_cert_unchecked(cert_entry_for(c1.clone())).unwrap();
    pool.add_cert_unchecked(cert_entry_for(c2)).unwrap();

    // a block confirms C1 (quality 5): only lower-or-equal quality pool
    // certs for the epoch are conflicting, so C2 (quality 10) survives
    let removed = pool.remove_conflicts_of_cert(&c1);
    assert!(removed.certs.iter().all(|cert| cert.quality <= 5));
    assert!(pool.contains(&c2_hash));

    // a block confirms a quality-20 cert: C2 goes too
    let c3 = cert(scid, 0, 20, 3);
    let removed = pool.remove_conflicts_of_cert(&c3);
    assert_eq!(removed.certs.len(), 1);
    assert!(!pool.contains(&c2_hash));
    pool.check_invariants();
}

#[test]
fn cert_may_not_depend_on_better_quality_cert() {
    let mut pool = Mempool::new();
    let scid = Scid([8; 32]);

    let high = cert(scid, 0, 10, 1);
    let high_hash = high.hash();
    pool.add_cert_unchecked(cert_entry_for(high)).unwrap();

    // a lower-quality cert spending the high-quality cert's change output
    let mut low = cert(scid, 0, 5, 2);
    low.inputs = vec![Input::PrevOut {
        outpoint: OutPoint {
            hash: high_hash,
            index: 0,
        },
        unlock_script: Script(vec![0x01]),
        sequence: 0,
    }];
    assert!(!pool.check_incoming_cert_conflicts(&low));

    // a higher-quality cert may spend the change output
    let mut higher = cert(scid, 0, 20, 3);
    higher.inputs = low.inputs.clone();
    assert!(pool.check_incoming_cert_conflicts(&higher));

    // but nobody may spend an unconfirmed backward transfer (index 1)
    let mut bwt_spender = cert(scid, 0, 30, 4);
    bwt_spender.inputs = vec![Input::PrevOut {
        outpoint: OutPoint {
            hash: high_hash,
            index: 1,
        },
        unlock_script: Script(vec![0x01]),
        sequence: 0,
    }];
    assert!(!pool.check_incoming_cert_conflicts(&bwt_spender));
}

#[test]
fn csw_per_sidechain_count_cap() {
    let mut pool = Mempool::new();
    let scid = Scid([9; 32]);

    for salt in 0..zenith_chain::parameters::SC_MAX_NUM_OF_CSW_INPUTS_IN_MEMPOOL {
        pool.add_tx_unchecked(entry_for(csw_tx(scid, 10, salt as u8)))
            .unwrap();
    }
    let over_cap = csw_tx(scid, 10, 0xEE);
    assert!(!pool.check_csw_inputs_per_sc_limit(&over_cap));
}

#[test]
fn out_of_balance_csw_removes_all_for_the_scid() {
    let mut pool = Mempool::new();
    let (scid, record) = ceased_record(0xA0, 100);

    let mut base = MemoryState::default();
    let mut delta = StateDelta::default();
    delta.sidechains.insert(scid, Some(record));
    base.batch_write(delta).unwrap();

    // two csw totalling 140 against a balance of 100
    let csw_a = csw_tx(scid, 60, 1);
    let csw_b = csw_tx(scid, 80, 2);
    pool.add_tx_unchecked(entry_for(csw_a)).unwrap();
    pool.add_tx_unchecked(entry_for(csw_b)).unwrap();

    let removed = pool.remove_out_of_balance_csw(&base);
    // the whole scid group goes, not an arbitrary fitting subset
    assert_eq!(removed.txs.len(), 2);
    assert!(pool.is_empty());
    pool.check_invariants();
}

#[test]
fn stale_sweep_drops_csw_for_revived_sidechain() {
    let mut pool = Mempool::new();
    let (scid, mut record) = ceased_record(0xB0, 100);
    record.revive();

    let mut base = MemoryState::default();
    let mut delta = StateDelta::default();
    delta.sidechains.insert(scid, Some(record));
    base.batch_write(delta).unwrap();

    pool.add_tx_unchecked(entry_for(csw_tx(scid, 10, 3))).unwrap();
    let removed = pool.remove_stale_transactions(&base, block::Height(25));
    assert_eq!(removed.txs.len(), 1);
    assert!(pool.is_empty());
}

#[test]
fn stale_sweep_drops_fwd_below_minimum_fee() {
    let mut pool = Mempool::new();

    let creation = creation_tx(10, 0xC0);
    let (scid, out) = creation.sidechain_creations().next().unwrap();
    let out = out.clone();
    let mut record = SidechainRecord::from_creation(creation.hash(), &out, block::Height(1));
    record.forward_transfer_sc_fee = 1_000i64.try_into().unwrap();

    let mut base = MemoryState::default();
    let mut delta = StateDelta::default();
    delta.sidechains.insert(scid, Some(record));
    base.batch_write(delta).unwrap();

    pool.add_tx_unchecked(entry_for(fwd_tx(scid, 500, 0xC1))).unwrap();
    let removed = pool.remove_stale_transactions(&base, block::Height(5));
    assert_eq!(removed.txs.len(), 1);
}

#[test]
fn trim_to_size_evicts_leaves_first() {
    let mut pool = Mempool::new();

    let parent = spend(transaction::Hash([1; 32]), 0, 1);
    let parent_hash = parent.hash();
    let mut parent_entry = entry_for(parent);
    parent_entry.fee = 100i64.try_into().unwrap(); // lowest fee rate
    pool.add_tx_unchecked(parent_entry).unwrap();

    let child = spend(parent_hash, 0, 2);
    let mut child_entry = entry_for(child);
    child_entry.fee = 50_000i64.try_into().unwrap();
    pool.add_tx_unchecked(child_entry).unwrap();

    // force eviction of exactly one object
    let target = pool.total_bytes() - 1;
    let evicted = pool.trim_to_size(target);

    // the parent has the worst fee rate but a child in the pool, so the
    // child (the only leaf) goes first
    assert_eq!(evicted.len(), 1);
    assert!(pool.contains(&parent_hash));
    pool.check_invariants();
}

#[test]
fn referenced_height_interleaving() {
    use std::collections::HashMap;

    let mut pool = Mempool::new();
    let scid = Scid([0xD0; 32]);

    let c100 = cert(scid, 0, 0, 1);
    let c200 = cert(scid, 1, 0, 2);
    let c150 = cert(scid, 2, 0, 3);

    let mut heights: HashMap<FieldElement, block::Height> = HashMap::new();
    heights.insert(c100.end_epoch_cum_tree_root, block::Height(100));
    heights.insert(c200.end_epoch_cum_tree_root, block::Height(200));
    heights.insert(c150.end_epoch_cum_tree_root, block::Height(150));

    assert!(pool.check_referenced_height(&c100, &heights));
    pool.add_cert_unchecked(cert_entry_for(c100)).unwrap();

    assert!(pool.check_referenced_height(&c200, &heights));
    pool.add_cert_unchecked(cert_entry_for(c200)).unwrap();

    // epoch 2 referencing height 150 would break the strictly increasing
    // order
    assert!(!pool.check_referenced_height(&c150, &heights));
}

#[test]
fn prioritisation_deltas_accumulate_and_clear() {
    let mut pool = Mempool::new();
    let hash = transaction::Hash([0xE0; 32]);

    assert_eq!(pool.deltas_for(&hash), (0.0, 0));
    pool.prioritise(hash, 1.5, 10_000);
    pool.prioritise(hash, 0.5, -2_000);
    assert_eq!(pool.deltas_for(&hash), (2.0, 8_000));

    pool.clear_prioritisation(&hash);
    assert_eq!(pool.deltas_for(&hash), (0.0, 0));
}

#[test]
fn recently_added_preserves_admission_order() {
    let mut pool = Mempool::new();
    let a = spend(transaction::Hash([1; 32]), 0, 1);
    let b = spend(transaction::Hash([2; 32]), 0, 2);
    let a_hash = a.hash();
    let b_hash = b.hash();

    pool.add_tx_unchecked(entry_for(a)).unwrap();
    pool.add_tx_unchecked(entry_for(b)).unwrap();

    let drained = pool.drain_recently_added();
    assert_eq!(drained.len(), 2);
    assert!(drained[0].0 < drained[1].0);
    assert_eq!(drained[0].1.hash(), a_hash);
    assert_eq!(drained[1].1.hash(), b_hash);
}
