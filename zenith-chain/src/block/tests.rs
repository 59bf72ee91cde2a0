//! Block construction and serialization tests.

use std::{convert::TryInto, sync::Arc};

use chrono::{TimeZone, Utc};

use super::*;
use crate::{
    cached::Cached,
    serialization::{WireDeserialize, WireSerialize},
    transaction::{LockTime, Transaction},
    transparent::{CoinbaseData, Input, Output, Script},
    work::difficulty::CompactDifficulty,
};

/// Generate a block header with fixed dummy fields.
fn block_header() -> Header {
    Header::new(
        3,
        Hash([0; 32]),
        merkle::Root([0; 32]),
        Utc.timestamp(1_600_000_000, 0),
        CompactDifficulty(0x1d00ffff),
        [7; 32],
        EquihashSolution(vec![0; 8]),
    )
}

fn coinbase(height: u32) -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase {
            height: Some(Cached::from(Height(height))),
            data: CoinbaseData::new(vec![0x01, height as u8]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: 1_250_000_000i64.try_into().unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

fn block_at(height: u32) -> Block {
    let coinbase = Arc::new(coinbase(height));
    let mut header = block_header();
    header.merkle_root = std::iter::once(coinbase.hash()).collect();
    Block {
        header,
        transactions: vec![coinbase],
        certificates: vec![],
    }
}

#[test]
fn coinbase_height_is_read_from_the_coinbase_input() {
    let block = block_at(101);
    assert_eq!(block.coinbase_height(), Some(Height(101)));
}

#[test]
fn merkle_root_covers_transactions() {
    let block = block_at(5);
    assert_eq!(block.merkle_root(), block.header.merkle_root);
}

#[test]
fn block_roundtrip() {
    let block = block_at(42);
    let bytes = block.wire_serialize_to_vec().unwrap();
    let parsed = Block::wire_deserialize(&bytes[..]).unwrap();
    assert_eq!(parsed, block);
    assert_eq!(parsed.hash(), block.hash());
}

#[test]
fn header_hash_is_stable_across_serialization() {
    let header = block_header();
    let bytes = header.wire_serialize_to_vec().unwrap();
    let parsed = Header::wire_deserialize(&bytes[..]).unwrap();
    assert_eq!(parsed.hash(), header.hash());
}

#[test]
fn hash_suffix_check() {
    let mut bytes = [0u8; 32];
    bytes[30] = 0xab;
    bytes[31] = 0xcd;
    let hash = Hash(bytes);
    assert!(hash.ends_with(&[0xab, 0xcd]));
    assert!(!hash.ends_with(&[0xcd, 0xab]));
}
