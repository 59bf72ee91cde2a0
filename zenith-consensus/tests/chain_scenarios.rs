//! End-to-end chain scenarios: spend chains, sidechain lifecycle,
//! certificate quality and reorgs, ceased-sidechain withdrawals, and
//! replay-protected transactions across reorgs.

use std::convert::TryInto;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use zenith_chain::{
    amount::{Amount, COIN},
    block::{self, Block, EquihashSolution, Header},
    cached::Cached,
    certificate::{BackwardTransfer, Certificate},
    parameters::{Network, NetworkParameters},
    sidechain::{FieldElement, ScProof, ScVk, Scid},
    transaction::{
        CswInput, LockTime, SidechainCreationOutput, SidechainPayload, Transaction,
        SC_TX_VERSION,
    },
    transparent::{CoinbaseData, Input, OutPoint, Output, Script},
    work::difficulty::CompactDifficulty,
};

use zenith_consensus::{
    accept_certificate, accept_transaction, AdmissionFlags, ChainContext, ChainController,
    ProofVerification, RejectCode, ValidationError,
};
use zenith_consensus::proof::FixedVerifier;
use zenith_state::{ChainState, CoinView, MemoryState, SidechainState};

const SUBSIDY: i64 = 1_250_000_000;

/// A test chain driver: builds structurally valid regtest blocks and feeds
/// them to the controller.
struct Harness {
    controller: ChainController<MemoryState>,
    context: Arc<ChainContext<MemoryState>>,
    tip_hash: block::Hash,
    next_height: u32,
    time: i64,
}

impl Harness {
    fn new() -> Harness {
        Harness::with_sc_coin_maturity(10)
    }

    fn with_sc_coin_maturity(sc_coin_maturity: u32) -> Harness {
        let mut params = NetworkParameters::new(Network::Regtest);
        params.sc_coin_maturity = sc_coin_maturity;
        let state = ChainState::new(params, MemoryState::default());
        let context = Arc::new(ChainContext::new(state));
        Harness {
            controller: ChainController::new(context.clone()),
            context,
            tip_hash: zenith_chain::parameters::GENESIS_PREVIOUS_BLOCK_HASH,
            next_height: 0,
            time: 1_600_000_000,
        }
    }

    fn coinbase(height: u32, salt: u8) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: Some(Cached::from(block::Height(height))),
                data: CoinbaseData::new(vec![0x01, height as u8, salt]),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: SUBSIDY.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        ))
    }

    fn build_block(
        &self,
        parent: block::Hash,
        height: u32,
        time: i64,
        mut transactions: Vec<Arc<Transaction>>,
        certificates: Vec<Arc<Certificate>>,
        salt: u8,
    ) -> Arc<Block> {
        transactions.insert(0, Self::coinbase(height, salt));
        let mut block = Block {
            header: Header::new(
                3,
                parent,
                zenith_chain::block::merkle::Root([0; 32]),
                Utc.timestamp(time, 0),
                CompactDifficulty(0x1d00ffff),
                [salt; 32],
                EquihashSolution(vec![]),
            ),
            transactions,
            certificates,
        };
        block.header.merkle_root = block.merkle_root();
        Arc::new(block)
    }

    /// Mine one block on the current tip.
    fn mine(
        &mut self,
        transactions: Vec<Arc<Transaction>>,
        certificates: Vec<Arc<Certificate>>,
    ) -> Result<Arc<Block>, ValidationError> {
        self.time += 100;
        let block = self.build_block(
            self.tip_hash,
            self.next_height,
            self.time,
            transactions,
            certificates,
            0,
        );
        self.controller.process_block(block.clone())?;
        self.tip_hash = block.hash();
        self.next_height += 1;
        Ok(block)
    }

    fn mine_empty(&mut self, count: u32) {
        for _ in 0..count {
            self.mine(vec![], vec![]).expect("empty blocks connect");
        }
    }

    fn tip_height(&self) -> Option<block::Height> {
        self.context
            .chain
            .lock()
            .unwrap()
            .tip_height()
    }

    fn sidechain(&self, scid: &Scid) -> Option<zenith_state::SidechainRecord> {
        self.context
            .chain
            .lock()
            .unwrap()
            .coins
            .sidechain(scid)
            .unwrap()
    }

    fn admit_tx(&self, tx: Arc<Transaction>) -> Result<(), ValidationError> {
        let flags = AdmissionFlags {
            require_standard: false,
            proof_verification: ProofVerification::Sync,
            ..AdmissionFlags::default()
        };
        self.admit_tx_with(tx, &flags)
    }

    fn admit_tx_with(
        &self,
        tx: Arc<Transaction>,
        flags: &AdmissionFlags,
    ) -> Result<(), ValidationError> {
        let chain = self.context.chain.lock().unwrap();
        let mut mempool = self.context.mempool.lock().unwrap();
        let verifier = Arc::new(FixedVerifier::default());
        accept_transaction(
            &chain,
            &mut mempool,
            &chain.index,
            &verifier,
            None,
            flags,
            tx,
        )
        .map(|_| ())
    }

    fn admit_cert(&self, cert: Arc<Certificate>) -> Result<(), ValidationError> {
        let chain = self.context.chain.lock().unwrap();
        let mut mempool = self.context.mempool.lock().unwrap();
        let verifier = Arc::new(FixedVerifier::default());
        let flags = AdmissionFlags {
            require_standard: false,
            proof_verification: ProofVerification::Sync,
            min_relay_fee: 0,
            ..AdmissionFlags::default()
        };
        accept_certificate(
            &chain,
            &mut mempool,
            &chain.index,
            &verifier,
            None,
            &flags,
            cert,
        )
        .map(|_| ())
    }

    fn mempool_contains(&self, hash: &zenith_chain::transaction::Hash) -> bool {
        self.context.mempool.lock().unwrap().contains(hash)
    }
}

fn spend(source: &Arc<Transaction>, index: u32, value: i64) -> Arc<Transaction> {
    Arc::new(Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: source.hash(),
                index,
            },
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: value.try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    ))
}

fn sc_creation_tx(
    funding: &Arc<Transaction>,
    epoch_len: u32,
    fwd_amount: i64,
) -> Arc<Transaction> {
    let mut tx = Transaction::new(
        SC_TX_VERSION,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: funding.hash(),
                index: 0,
            },
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![],
        LockTime::unlocked(),
    );
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![SidechainCreationOutput {
            version: 2,
            withdrawal_epoch_length: epoch_len,
            amount: fwd_amount.try_into().unwrap(),
            address: FieldElement([1; 32]),
            custom_data: vec![],
            constant: None,
            cert_vk: ScVk(vec![1; 32]),
            ceased_vk: Some(ScVk(vec![2; 32])),
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
    Arc::new(tx)
}

fn csw_tx(scid: Scid, value: i64, nullifier_salt: u8) -> Arc<Transaction> {
    // the reclaimed value goes to a transparent output, minus a small fee
    let mut tx = Transaction::new(
        SC_TX_VERSION,
        vec![],
        vec![Output {
            value: (value - 1_000).try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![],
        forward_transfers: vec![],
        bwt_requests: vec![],
        csw_inputs: vec![CswInput {
            scid,
            value: value.try_into().unwrap(),
            nullifier: FieldElement([nullifier_salt; 32]),
            pub_key_hash: [nullifier_salt; 20],
            proof: ScProof(vec![1, 2, 3]),
            act_cert_data_hash: None,
            ceasing_cum_tree_hash: FieldElement([7; 32]),
            redeem_script: Script(vec![]),
        }],
    });
    Arc::new(tx)
}

fn cert(scid: Scid, epoch: u32, quality: u64, bwt: i64, salt: u8) -> Arc<Certificate> {
    Arc::new(Certificate::new(
        scid,
        epoch,
        quality,
        FieldElement([salt; 32]),
        ScProof(vec![salt]),
        vec![],
        vec![],
        vec![],
        vec![BackwardTransfer {
            value: bwt.try_into().unwrap(),
            pk_dest: [salt; 20],
        }],
        Amount::zero(),
        Amount::zero(),
    ))
}

// ---- scenario 1: simple spend chain ----------------------------------

#[test]
fn simple_spend_chain_respects_coinbase_maturity() {
    zenith_test::init();
    let mut harness = Harness::new();

    harness.mine_empty(1); // genesis at height 0
    let b1 = harness.mine(vec![], vec![]).unwrap(); // height 1
    let coinbase = b1.transactions[0].clone();

    // spending the height-1 coinbase before height 101 is immature
    let premature = spend(&coinbase, 0, SUBSIDY - 10_000);
    harness.mine_empty(10); // tip now height 11
    assert!(harness.admit_tx(premature).is_err());

    // at tip height 100, the spend (confirmed at 101) is mature
    harness.mine_empty(100 - 11);
    assert_eq!(harness.tip_height(), Some(block::Height(100)));

    let spend_to_b = spend(&coinbase, 0, SUBSIDY - 10_000);
    harness.admit_tx(spend_to_b.clone()).unwrap();
    harness.mine(vec![spend_to_b.clone()], vec![]).unwrap();

    // B holds 12.4999...; the coinbase output is spent
    let chain = harness.context.chain.lock().unwrap();
    let b_coin = chain.coins.coins(&spend_to_b.hash()).unwrap().unwrap();
    assert_eq!(
        b_coin.output(0).unwrap().value.zatoshi(),
        SUBSIDY - 10_000
    );
    let source = chain.coins.coins(&coinbase.hash()).unwrap().unwrap();
    assert!(source.is_fully_spent());
}

// ---- operator prioritisation ------------------------------------------

#[test]
fn prioritisation_deltas_feed_the_fee_gate() {
    zenith_test::init();
    let mut harness = Harness::new();

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100); // tip 101

    // a zero-fee spend, with the free-relay priority path disabled
    let zero_fee = spend(&funding, 0, SUBSIDY);
    let strict = AdmissionFlags {
        require_standard: false,
        proof_verification: ProofVerification::Sync,
        limit_free: false,
        ..AdmissionFlags::default()
    };
    let error = harness.admit_tx_with(zero_fee.clone(), &strict).unwrap_err();
    assert_eq!(error.reject_code(), RejectCode::InsufficientFee);

    // an operator fee bump lifts it over the relay floor
    harness
        .context
        .mempool
        .lock()
        .unwrap()
        .prioritise(zero_fee.hash(), 0.0, 50_000);
    harness.admit_tx_with(zero_fee.clone(), &strict).unwrap();
    assert!(harness.mempool_contains(&zero_fee.hash()));
}

// ---- scenario 2: shielded round-trip ----------------------------------

/// The anchor a shielded transaction introduces, mirroring the connect
/// pipeline's commitment chaining.
fn anchor_of(tx: &Arc<Transaction>) -> zenith_chain::transaction::Anchor {
    use zenith_chain::serialization::sha256d;
    let mut preimage = Vec::new();
    preimage.extend_from_slice(&tx.hash().0);
    for joinsplit in tx.joinsplits() {
        for commitment in &joinsplit.commitments {
            preimage.extend_from_slice(&commitment.0);
        }
    }
    zenith_chain::transaction::Anchor(sha256d::digest(&preimage))
}

fn sign_joinsplits(tx: &mut Transaction) {
    use rand::rngs::OsRng;
    let sk = ed25519_zebra::SigningKey::new(OsRng);
    let vk = ed25519_zebra::VerificationKey::from(&sk);
    tx.joinsplit_data.as_mut().unwrap().pub_key = vk.into();
    tx.joinsplit_data.as_mut().unwrap().sig = [0; 64];
    let digest = zenith_chain::transaction::sighash::joinsplit_signature_hash(tx);
    tx.joinsplit_data.as_mut().unwrap().sig = sk.sign(&digest).into();
}

#[test]
fn shielded_round_trip_conserves_value_and_records_the_nullifier_once() {
    use zenith_chain::transaction::{
        Anchor, JoinSplit, JoinSplitData, NoteCommitment, Nullifier, SHIELDED_TX_VERSION,
    };

    zenith_test::init();
    let mut harness = Harness::new();

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100); // tip 101

    // transparent → shielded: vpub_old = 0.5
    let mut shield = Transaction::new(
        SHIELDED_TX_VERSION,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: funding.hash(),
                index: 0,
            },
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            // change: 12.5 - 0.5 - fee
            value: (SUBSIDY - COIN / 2 - 10_000).try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    shield.joinsplit_data = Some(JoinSplitData {
        joinsplits: vec![JoinSplit {
            vpub_old: (COIN / 2).try_into().unwrap(),
            vpub_new: Amount::zero(),
            anchor: Anchor([0; 32]),
            nullifiers: [Nullifier([0xA1; 32]), Nullifier([0xA2; 32])],
            commitments: [NoteCommitment([0xC1; 32]), NoteCommitment([0xC2; 32])],
            proof: vec![0; 8],
        }],
        pub_key: [0; 32],
        sig: [0; 64],
    });
    sign_joinsplits(&mut shield);
    let shield = Arc::new(shield);

    // the first joinsplit anchors at the empty tree, which connect marks
    // known only after a shielded tx exists; seed it directly
    {
        let mut chain = harness.context.chain.lock().unwrap();
        chain.coins.add_anchor(Anchor([0; 32]));
    }

    harness.mine(vec![shield.clone()], vec![]).unwrap();

    // shielded → transparent: vpub_new = 0.5, consuming the inner note
    let inner_anchor = anchor_of(&shield);
    let mut unshield = Transaction::new(
        SHIELDED_TX_VERSION,
        vec![],
        vec![Output {
            value: (COIN / 2 - 10_000).try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    unshield.joinsplit_data = Some(JoinSplitData {
        joinsplits: vec![JoinSplit {
            vpub_old: Amount::zero(),
            vpub_new: (COIN / 2).try_into().unwrap(),
            anchor: inner_anchor,
            nullifiers: [Nullifier([0xB1; 32]), Nullifier([0xB2; 32])],
            commitments: [NoteCommitment([0xC3; 32]), NoteCommitment([0xC4; 32])],
            proof: vec![0; 8],
        }],
        pub_key: [0; 32],
        sig: [0; 64],
    });
    sign_joinsplits(&mut unshield);
    let unshield = Arc::new(unshield);

    harness.admit_tx(unshield.clone()).unwrap();
    harness.mine(vec![unshield.clone()], vec![]).unwrap();

    let chain = harness.context.chain.lock().unwrap();
    // final transparent balance conserved
    let out_coin = chain.coins.coins(&unshield.hash()).unwrap().unwrap();
    assert_eq!(
        out_coin.output(0).unwrap().value.zatoshi(),
        COIN / 2 - 10_000
    );
    // every nullifier recorded exactly once
    for nf in [[0xA1; 32], [0xA2; 32], [0xB1; 32], [0xB2; 32]].iter() {
        assert!(chain.coins.nullifier_spent(&Nullifier(*nf)).unwrap());
    }
    drop(chain);

    // replaying the nullifier is rejected
    let mut replay = (*unshield).clone();
    replay.outputs[0].value = (COIN / 2 - 20_000).try_into().unwrap();
    sign_joinsplits(&mut replay);
    let error = harness.admit_tx(Arc::new(replay)).unwrap_err();
    assert_eq!(error.reject_code(), RejectCode::HasConflicts);
}

// ---- scenario 3: sidechain creation, maturity, cease, csw ------------

#[test]
fn sidechain_lifecycle_from_creation_to_ceased_withdrawal() {
    zenith_test::init();
    let mut harness = Harness::with_sc_coin_maturity(10);

    harness.mine_empty(1); // genesis
    let funding_block = harness.mine(vec![], vec![]).unwrap(); // height 1
    let funding = funding_block.transactions[0].clone();
    harness.mine_empty(100); // mature the funding coinbase; tip 101

    // creation with epoch length 10, forward amount 1.0
    let creation = sc_creation_tx(&funding, 10, COIN);
    let scid = creation.sidechain_creations().next().unwrap().0;
    harness.mine(vec![creation], vec![]).unwrap();

    // immediately after creation: alive, balance still immature
    let record = harness.sidechain(&scid).expect("sidechain registered");
    assert_eq!(record.state(), SidechainState::Alive);
    assert!(record.balance.is_zero());

    // at creation + 10 (coin maturity) the balance matures to 1.0
    harness.mine_empty(10);
    let record = harness.sidechain(&scid).unwrap();
    assert_eq!(record.balance.zatoshi(), COIN);

    // without any certificate the sidechain ceases at its deadline
    let deadline = record.current_ceasing_height().unwrap();
    harness.mine_empty(deadline.0 - harness.tip_height().unwrap().0);
    let record = harness.sidechain(&scid).unwrap();
    assert_eq!(record.state(), SidechainState::Ceased);
    assert_eq!(record.ceased_at, Some(deadline));

    // a csw of 0.4 is accepted and consumes balance
    let csw_ok = csw_tx(scid, 40_000_000, 1);
    harness.admit_tx(csw_ok.clone()).unwrap();
    harness.mine(vec![csw_ok], vec![]).unwrap();
    let record = harness.sidechain(&scid).unwrap();
    assert_eq!(record.balance.zatoshi(), 60_000_000);

    // a second csw of 0.7 overdraws and is rejected
    let csw_over = csw_tx(scid, 70_000_000, 2);
    let error = harness.admit_tx(csw_over).unwrap_err();
    assert_eq!(error.reject_code(), RejectCode::InsufficientScidFunds);
}

// ---- scenario 4: certificate quality and reorg ------------------------

#[test]
fn certificate_quality_across_a_reorg() {
    zenith_test::init();
    let mut harness = Harness::with_sc_coin_maturity(2);

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100);

    let creation = sc_creation_tx(&funding, 10, COIN);
    let scid = creation.sidechain_creations().next().unwrap().0;
    harness.mine(vec![creation], vec![]).unwrap();
    let creation_height = harness.tip_height().unwrap().0;

    // run past the end of epoch 0 so certificates become admissible
    let epoch_end = creation_height + 10 - 1;
    harness.mine_empty(epoch_end + 1 - harness.tip_height().unwrap().0);

    let c1 = cert(scid, 0, 5, 10_000_000, 1);
    let c2 = cert(scid, 0, 10, 20_000_000, 2);
    harness.admit_cert(c1.clone()).unwrap();
    harness.admit_cert(c2.clone()).unwrap();
    assert!(harness.mempool_contains(&c1.hash()));
    assert!(harness.mempool_contains(&c2.hash()));

    // a block confirms C1 only; C2 leaves the pool (its epoch is closed)
    let fork_base = harness.tip_hash;
    let fork_height = harness.next_height;
    let fork_time = harness.time;
    harness.mine(vec![], vec![c1.clone()]).unwrap();
    assert!(!harness.mempool_contains(&c2.hash()));

    let record = harness.sidechain(&scid).unwrap();
    assert_eq!(record.last_cert.as_ref().unwrap().hash, c1.hash());
    assert_eq!(record.last_cert.as_ref().unwrap().quality, 5);
    assert_eq!(record.balance.zatoshi(), COIN - 10_000_000);

    // a longer branch from the fork confirms C2 instead
    let alt1 = harness.build_block(
        fork_base,
        fork_height,
        fork_time + 150,
        vec![],
        vec![c2.clone()],
        0xA1,
    );
    let alt2 = harness.build_block(
        alt1.hash(),
        fork_height + 1,
        fork_time + 250,
        vec![],
        vec![],
        0xA2,
    );
    harness.controller.process_block(alt1).unwrap();
    harness.controller.process_block(alt2.clone()).unwrap();
    harness.tip_hash = alt2.hash();
    harness.next_height = fork_height + 2;

    // the reorg replaced C1 with C2 as top quality
    let record = harness.sidechain(&scid).unwrap();
    assert_eq!(record.last_cert.as_ref().unwrap().hash, c2.hash());
    assert_eq!(record.last_cert.as_ref().unwrap().quality, 10);
    assert_eq!(record.balance.zatoshi(), COIN - 20_000_000);
}

// ---- scenario 5: non-ceasing sequencing -------------------------------

#[test]
fn non_ceasing_certificates_require_increasing_referenced_heights() {
    zenith_test::init();
    let mut harness = Harness::with_sc_coin_maturity(2);

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100);

    // epoch length 0: non-ceasing
    let creation = sc_creation_tx(&funding, 0, COIN);
    let scid = creation.sidechain_creations().next().unwrap().0;
    harness.mine(vec![creation], vec![]).unwrap();
    harness.mine_empty(5);

    // cumulative commitments of three connected heights, out of order
    let (root_a, root_b, root_c) = {
        let chain = harness.context.chain.lock().unwrap();
        let cum = |height: u32| {
            let node = chain.active.at(block::Height(height)).unwrap();
            chain.index.get(node).cum_sc_commitment.unwrap()
        };
        (cum(100), cum(104), cum(102))
    };

    let mut c_a = cert(scid, 0, 0, 0, 1);
    Arc::get_mut(&mut c_a).unwrap().end_epoch_cum_tree_root = root_a;
    let mut c_b = cert(scid, 1, 0, 0, 2);
    Arc::get_mut(&mut c_b).unwrap().end_epoch_cum_tree_root = root_b;
    let mut c_c = cert(scid, 2, 0, 0, 3);
    Arc::get_mut(&mut c_c).unwrap().end_epoch_cum_tree_root = root_c;

    harness.admit_cert(c_a).unwrap();
    harness.admit_cert(c_b).unwrap();
    // heights ran {100, 104, 102}: the third is out of order
    let error = harness.admit_cert(c_c).unwrap_err();
    assert!(matches!(
        error,
        ValidationError::Certificate(zenith_consensus::CertificateError::BadTiming)
    ));
}

// ---- scenario 6: replay-protected tx across a reorg -------------------

#[test]
fn replay_protected_transaction_is_swept_after_reorg() {
    zenith_test::init();
    let mut harness = Harness::new();

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100); // tip 101

    // remember the fork point, then mine the referenced block
    let fork_base = harness.tip_hash;
    let fork_height = harness.next_height;
    let fork_time = harness.time;
    harness.mine_empty(1); // the block at `fork_height` we will replace
    let referenced_height = fork_height;
    let referenced_hash = {
        let chain = harness.context.chain.lock().unwrap();
        chain.hash_at(block::Height(referenced_height)).unwrap()
    };

    // a spend whose output commits to a suffix of that block's hash
    let suffix = [
        referenced_hash.0[30],
        referenced_hash.0[31],
    ];
    let mut lock = vec![0x51, 0x02, suffix[0], suffix[1]];
    // minimally encoded height push
    let height_bytes: Vec<u8> = {
        let mut bytes = Vec::new();
        let mut value = referenced_height;
        while value > 0 {
            bytes.push((value & 0xff) as u8);
            value >>= 8;
        }
        bytes
    };
    lock.push(height_bytes.len() as u8);
    lock.extend_from_slice(&height_bytes);
    lock.push(0xb4); // OP_CHECKBLOCKATHEIGHT

    let protected = Arc::new(Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: funding.hash(),
                index: 0,
            },
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: (SUBSIDY - 10_000).try_into().unwrap(),
            lock_script: Script(lock),
        }],
        LockTime::unlocked(),
    ));

    harness.admit_tx(protected.clone()).unwrap();
    assert!(harness.mempool_contains(&protected.hash()));

    // a two-block branch replaces the referenced block
    let alt1 = harness.build_block(fork_base, fork_height, fork_time + 150, vec![], vec![], 0xB1);
    let alt2 = harness.build_block(
        alt1.hash(),
        fork_height + 1,
        fork_time + 250,
        vec![],
        vec![],
        0xB2,
    );
    harness.controller.process_block(alt1.clone()).unwrap();
    harness.controller.process_block(alt2).unwrap();

    // the new block at that height has a different hash; unless its hash
    // happens to share the two-byte suffix, the tx is evicted
    let new_hash = {
        let chain = harness.context.chain.lock().unwrap();
        chain.hash_at(block::Height(referenced_height)).unwrap()
    };
    assert_ne!(new_hash, referenced_hash);
    if !new_hash.ends_with(&suffix) {
        assert!(!harness.mempool_contains(&protected.hash()));
    }
}

// ---- reorg round-trip property ----------------------------------------

#[test]
fn connect_then_disconnect_restores_the_coin_view() {
    zenith_test::init();
    let mut harness = Harness::new();

    harness.mine_empty(1);
    let funding = harness.mine(vec![], vec![]).unwrap().transactions[0].clone();
    harness.mine_empty(100);

    let creation = sc_creation_tx(&funding, 10, COIN);
    let scid = creation.sidechain_creations().next().unwrap().0;

    let before_record = harness.sidechain(&scid);
    assert!(before_record.is_none());

    harness.mine(vec![creation.clone()], vec![]).unwrap();
    assert!(harness.sidechain(&scid).is_some());

    // disconnect the tip by hand and compare
    {
        let mut chain = harness.context.chain.lock().unwrap();
        harness.controller.disconnect_tip(&mut chain).unwrap();
    }
    assert!(harness.sidechain(&scid).is_none());
    let chain = harness.context.chain.lock().unwrap();
    assert!(chain
        .coins
        .coins(&creation.hash())
        .unwrap()
        .is_none());
    assert_eq!(chain.tip_height(), Some(block::Height(101)));
}
