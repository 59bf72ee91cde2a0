//! Shielded joinsplits: the state-transition units of the shielded pool.

use std::io;

use serde::{Deserialize, Serialize};
use serde_big_array::big_array;

use crate::{
    amount::{Amount, NonNegative},
    serialization::{SerializationError, WireDeserialize, WireSerialize},
};

big_array! { BigArray; }

/// The spend-tag of a shielded note, revealed when the note is consumed.
///
/// Unique per note; global uniqueness across the confirmed chain and the
/// mempool is a consensus invariant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

/// A hiding, binding commitment placed into the commitment tree when a
/// shielded note is created.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NoteCommitment(pub [u8; 32]);

/// The root of the note commitment tree at some block, proving membership of
/// the notes a joinsplit consumes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Anchor(pub [u8; 32]);

macro_rules! impl_wire_for_byte32_newtype {
    ($name:ident) => {
        impl WireSerialize for $name {
            fn wire_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
                self.0.wire_serialize(writer)
            }
        }

        impl WireDeserialize for $name {
            fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
                Ok($name(<[u8; 32]>::wire_deserialize(reader)?))
            }
        }
    };
}

impl_wire_for_byte32_newtype!(Nullifier);
impl_wire_for_byte32_newtype!(NoteCommitment);
impl_wire_for_byte32_newtype!(Anchor);

/// One shielded state transition: consumes two notes and produces two notes,
/// with optional transparent value flowing in (`vpub_old`) or out
/// (`vpub_new`).
///
/// Consensus requires `vpub_old * vpub_new == 0`: value may enter or leave
/// the shielded pool in one joinsplit, never both.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JoinSplit {
    /// Transparent value flowing into the shielded pool.
    pub vpub_old: Amount<NonNegative>,
    /// Transparent value flowing out of the shielded pool.
    pub vpub_new: Amount<NonNegative>,
    /// The commitment-tree root this joinsplit proves membership against.
    pub anchor: Anchor,
    /// The spend-tags of the two consumed notes.
    pub nullifiers: [Nullifier; 2],
    /// The commitments of the two produced notes.
    pub commitments: [NoteCommitment; 2],
    /// The zero-knowledge proof, validated by the external verifier.
    pub proof: Vec<u8>,
}

impl WireSerialize for JoinSplit {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.vpub_old.wire_serialize(&mut writer)?;
        self.vpub_new.wire_serialize(&mut writer)?;
        self.anchor.wire_serialize(&mut writer)?;
        self.nullifiers[0].wire_serialize(&mut writer)?;
        self.nullifiers[1].wire_serialize(&mut writer)?;
        self.commitments[0].wire_serialize(&mut writer)?;
        self.commitments[1].wire_serialize(&mut writer)?;
        self.proof.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for JoinSplit {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(JoinSplit {
            vpub_old: WireDeserialize::wire_deserialize(&mut reader)?,
            vpub_new: WireDeserialize::wire_deserialize(&mut reader)?,
            anchor: Anchor::wire_deserialize(&mut reader)?,
            nullifiers: [
                Nullifier::wire_deserialize(&mut reader)?,
                Nullifier::wire_deserialize(&mut reader)?,
            ],
            commitments: [
                NoteCommitment::wire_deserialize(&mut reader)?,
                NoteCommitment::wire_deserialize(&mut reader)?,
            ],
            proof: <Vec<u8>>::wire_deserialize(&mut reader)?,
        })
    }
}

/// The joinsplits of a transaction plus the ed25519 key and signature that
/// bind them to it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JoinSplitData {
    /// The joinsplits, in order.
    pub joinsplits: Vec<JoinSplit>,
    /// The ed25519 verification key signing the whole transaction.
    pub pub_key: [u8; 32],
    /// The ed25519 signature over the transaction's joinsplit sighash.
    #[serde(with = "BigArray")]
    pub sig: [u8; 64],
}

impl JoinSplitData {
    /// Verify the binding signature over `sighash`.
    pub fn verify_signature(&self, sighash: &[u8; 32]) -> Result<(), ed25519_zebra::Error> {
        use std::convert::TryFrom;
        let vk = ed25519_zebra::VerificationKey::try_from(self.pub_key)?;
        vk.verify(&ed25519_zebra::Signature::from(self.sig), sighash)
    }
}

impl WireSerialize for JoinSplitData {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.joinsplits.wire_serialize(&mut writer)?;
        self.pub_key.wire_serialize(&mut writer)?;
        self.sig.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for JoinSplitData {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(JoinSplitData {
            joinsplits: <Vec<JoinSplit>>::wire_deserialize(&mut reader)?,
            pub_key: <[u8; 32]>::wire_deserialize(&mut reader)?,
            sig: <[u8; 64]>::wire_deserialize(&mut reader)?,
        })
    }
}
