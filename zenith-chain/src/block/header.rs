use std::io;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serialization::{SerializationError, WireDeserialize, WireSerialize};
use crate::{cached::Cached, work::difficulty::CompactDifficulty};

use super::{merkle, Hash, Height};

/// The Equihash parameter `n` used by the proof of work.
pub const EQUIHASH_N: u32 = 200;

/// The Equihash parameter `k` used by the proof of work.
pub const EQUIHASH_K: u32 = 9;

/// An Equihash solution, attached to every block header.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EquihashSolution(pub Vec<u8>);

impl EquihashSolution {
    /// The serialized size of a solution for the (200, 9) parameters.
    pub const SOLUTION_SIZE: usize = 1344;
}

impl std::fmt::Debug for EquihashSolution {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("EquihashSolution")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

impl WireSerialize for EquihashSolution {
    fn wire_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.wire_serialize(writer)
    }
}

impl WireDeserialize for EquihashSolution {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(EquihashSolution(<Vec<u8>>::wire_deserialize(reader)?))
    }
}

/// A block header, containing metadata about a block.
///
/// How are blocks chained together? They are chained together via the
/// backwards reference (previous header hash) present in the block header.
/// Each block points backwards to its parent, all the way back to the
/// genesis block (the first block in the blockchain).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    ///
    /// This ensures no previous block can be changed without also changing
    /// this block's header.
    pub previous_block_hash: Hash,

    /// The root of the Merkle tree over the block's transactions and
    /// certificates, binding the header to the block contents.
    pub merkle_root: merkle::Root,

    /// The block timestamp is a Unix epoch time (UTC) when the miner started
    /// hashing the header (according to the miner).
    pub time: DateTime<Utc>,

    /// An encoded version of the target threshold this block's header hash
    /// must be less than or equal to, in the nBits format.
    pub difficulty_threshold: CompactDifficulty,

    /// An arbitrary field that miners change to modify the header hash in
    /// order to produce a hash less than or equal to the target threshold.
    pub nonce: [u8; 32],

    /// The Equihash solution for this header.
    pub solution: EquihashSolution,

    /// For efficiency, we cache the hash of this block after computing it
    /// the first time. This field is not part of the consensus
    /// serialization.
    hash: Cached<Hash>,
}

#[derive(Error, Debug)]
pub enum BlockTimeError {
    #[error("invalid time {0:?} in block header {1:?} {2:?}: block time is more than 2 hours in the future ({3:?}). Hint: check your machine's date, time, and time zone.")]
    InvalidBlockTime(DateTime<Utc>, Height, Hash, DateTime<Utc>),
}

impl Header {
    pub fn new(
        version: u32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: [u8; 32],
        solution: EquihashSolution,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            solution,
            hash: Cached::new(),
        }
    }

    /// The hash of this header, cached after the first computation.
    pub fn hash(&self) -> Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        Hash::from(self)
    }

    /// Returns `Ok(())` if `self.time` is less than or equal to 2 hours in
    /// the future, according to the node's local clock (`now`).
    ///
    /// This is a non-deterministic rule, as clocks vary over time and
    /// between different nodes. A block rejected by this rule at a given
    /// point in time may later be accepted.
    pub fn time_is_valid_at(
        &self,
        now: DateTime<Utc>,
        height: &Height,
        hash: &Hash,
    ) -> Result<(), BlockTimeError> {
        let two_hours_in_the_future = now
            .checked_add_signed(Duration::hours(2))
            .expect("calculating 2 hours in the future does not overflow");
        if self.time <= two_hours_in_the_future {
            Ok(())
        } else {
            Err(BlockTimeError::InvalidBlockTime(
                self.time,
                *height,
                *hash,
                two_hours_in_the_future,
            ))
        }
    }

    /// Verify the Equihash solution against this header.
    pub fn is_equihash_solution_valid(&self) -> Result<(), equihash::Error> {
        // the solution is checked against the serialized header up to and
        // including the nonce
        let mut input = Vec::new();
        self.version
            .wire_serialize(&mut input)
            .expect("serialization into a vec is infallible");
        self.previous_block_hash
            .wire_serialize(&mut input)
            .expect("serialization into a vec is infallible");
        self.merkle_root
            .wire_serialize(&mut input)
            .expect("serialization into a vec is infallible");
        self.time
            .wire_serialize(&mut input)
            .expect("serialization into a vec is infallible");
        self.difficulty_threshold
            .wire_serialize(&mut input)
            .expect("serialization into a vec is infallible");

        equihash::is_valid_solution(EQUIHASH_N, EQUIHASH_K, &input, &self.nonce, &self.solution.0)
    }
}

impl WireSerialize for Header {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.wire_serialize(&mut writer)?;
        self.previous_block_hash.wire_serialize(&mut writer)?;
        self.merkle_root.wire_serialize(&mut writer)?;
        self.time.wire_serialize(&mut writer)?;
        self.difficulty_threshold.wire_serialize(&mut writer)?;
        self.nonce.wire_serialize(&mut writer)?;
        self.solution.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for Header {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let mut reader = crate::transaction::HashReader::new(reader);
        let version = u32::wire_deserialize(&mut reader)?;
        let previous_block_hash = Hash::wire_deserialize(&mut reader)?;
        let merkle_root = merkle::Root::wire_deserialize(&mut reader)?;
        let time = <DateTime<Utc>>::wire_deserialize(&mut reader)?;
        let difficulty_threshold = CompactDifficulty::wire_deserialize(&mut reader)?;
        let nonce = <[u8; 32]>::wire_deserialize(&mut reader)?;
        let solution = EquihashSolution::wire_deserialize(&mut reader)?;
        let hash = Hash(reader.finish());

        Ok(Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            solution,
            hash: Cached::from(hash),
        })
    }
}
