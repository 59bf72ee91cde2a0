//! Transaction structure and serialization tests.

use std::convert::TryInto;

use super::*;
use crate::{
    serialization::{WireDeserialize, WireSerialize},
    sidechain::{FieldElement, ScProof, ScVk, Scid},
    transparent::{Input, OutPoint, Output, Script},
};

fn spend_input(source: Hash) -> Input {
    Input::PrevOut {
        outpoint: OutPoint {
            hash: source,
            index: 0,
        },
        unlock_script: Script(vec![0x01, 0x02]),
        sequence: 0xffff_ffff,
    }
}

fn plain_tx() -> Transaction {
    Transaction::new(
        TRANSPARENT_TX_VERSION,
        vec![spend_input(Hash([1; 32]))],
        vec![Output {
            value: 1_249_990_000i64.try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

fn sc_tx() -> Transaction {
    let mut tx = Transaction::new(
        SC_TX_VERSION,
        vec![spend_input(Hash([2; 32]))],
        vec![],
        LockTime::unlocked(),
    );
    tx.sidechain_payload = Some(SidechainPayload {
        sc_creations: vec![SidechainCreationOutput {
            version: 2,
            withdrawal_epoch_length: 10,
            amount: 100_000_000i64.try_into().unwrap(),
            address: FieldElement([4; 32]),
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
        forward_transfers: vec![ForwardTransferOutput {
            scid: Scid([9; 32]),
            amount: 50_000_000i64.try_into().unwrap(),
            address: FieldElement([5; 32]),
            mc_return_address: [6; 20],
        }],
        bwt_requests: vec![],
        csw_inputs: vec![CswInput {
            scid: Scid([8; 32]),
            value: 40_000_000i64.try_into().unwrap(),
            nullifier: FieldElement([7; 32]),
            pub_key_hash: [3; 20],
            proof: ScProof(vec![0xAA; 8]),
            act_cert_data_hash: None,
            ceasing_cum_tree_hash: FieldElement([6; 32]),
            redeem_script: Script(vec![0x51]),
        }],
    });
    tx
}

#[test]
fn plain_tx_roundtrip() {
    let tx = plain_tx();
    let bytes = tx.wire_serialize_to_vec().unwrap();
    let parsed = Transaction::wire_deserialize(&bytes[..]).unwrap();
    assert_eq!(parsed, tx);
    assert_eq!(parsed.hash(), tx.hash());
}

#[test]
fn sc_tx_roundtrip_preserves_payload() {
    let tx = sc_tx();
    let bytes = tx.wire_serialize_to_vec().unwrap();
    let parsed = Transaction::wire_deserialize(&bytes[..]).unwrap();
    assert_eq!(parsed, tx);
    assert_eq!(parsed.csw_inputs().count(), 1);
    assert_eq!(parsed.forward_transfers().count(), 1);
    assert_eq!(parsed.sidechain_creations().count(), 1);
}

#[test]
fn scid_derivation_uses_tx_hash_and_position() {
    let tx = sc_tx();
    let (scid, _) = tx.sidechain_creations().next().unwrap();
    assert_eq!(scid, Scid::derive(tx.hash(), 0));
}

#[test]
fn value_accounting_includes_crosschain_flows() {
    let tx = sc_tx();
    // creations (1.0) + forward transfers (0.5); csw (0.4) flows in
    assert_eq!(tx.value_out().unwrap().zatoshi(), 150_000_000);
    assert_eq!(tx.value_in_from_extensions().unwrap().zatoshi(), 40_000_000);
}

#[test]
fn coinbase_detection() {
    let tx = plain_tx();
    assert!(!tx.is_coinbase());
    assert!(!tx.contains_coinbase_input());
}

#[test]
fn tx_len_matches_serialization() {
    let tx = sc_tx();
    assert_eq!(tx.len(), tx.wire_serialize_to_vec().unwrap().len());
}
