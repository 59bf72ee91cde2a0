//! Core chain data structures and functions for zenith.
//!
//! This crate provides definitions of the consensus-critical data structures
//! of the mainchain (blocks, transactions, certificates, sidechain
//! primitives), their byte-exact wire serialization, and the arithmetic they
//! depend on (amounts, difficulty, hashes). It performs no I/O and holds no
//! chain state.

#![allow(clippy::len_without_is_empty)]

pub mod amount;
pub mod block;
pub mod cached;
pub mod certificate;
pub mod compactint;
pub mod parameters;
pub mod serialization;
pub mod sidechain;
pub mod transaction;
pub mod transparent;
pub mod work;

pub(crate) mod fmt;

pub use serialization::{
    SerializationError, WireDeserialize, WireDeserializeInto, WireSerialize,
};
