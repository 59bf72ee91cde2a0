//! Sidechain primitives: identifiers, field elements, and the opaque proof
//! and verification-key containers checked by the external SNARK verifier.

use crate::{
    compactint::CompactInt,
    serialization::{sha256d, SerializationError, WireDeserialize, WireSerialize},
    transaction,
};

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use wire_serde_derive::{WireDeser, WireSer};

/// The number of bytes in a serialized field element.
pub const FIELD_ELEMENT_SIZE: usize = 32;

/// A 256-bit sidechain identifier, derived from the creation transaction.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize, WireSer, WireDeser,
)]
pub struct Scid(pub [u8; 32]);

impl Scid {
    /// Derive the scid for the `index`-th sidechain creation output of the
    /// transaction with hash `creation_tx`.
    pub fn derive(creation_tx: transaction::Hash, index: u32) -> Scid {
        let mut preimage = Vec::with_capacity(36);
        preimage.extend_from_slice(&creation_tx.0);
        preimage.extend_from_slice(&index.to_le_bytes());
        Scid(sha256d::digest(&preimage))
    }
}

impl std::fmt::Display for Scid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(reversed_bytes))
    }
}

impl std::fmt::Debug for Scid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("Scid")
            .field(&hex::encode(reversed_bytes))
            .finish()
    }
}

/// An element of the proving system's field, treated as an opaque 32-byte
/// container.
///
/// Validity is decided by the external verifier; this type only enforces the
/// size. Used for csw nullifiers, cumulative commitment-tree roots,
/// certificate data hashes, and sidechain constants.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize, WireSer, WireDeser,
)]
pub struct FieldElement(pub [u8; FIELD_ELEMENT_SIZE]);

impl FieldElement {
    pub fn zero() -> FieldElement {
        FieldElement([0; FIELD_ELEMENT_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; FIELD_ELEMENT_SIZE]
    }

    /// The legacy double-SHA256 form of this element, used as the key of the
    /// cumulative-commitment-root → height map.
    pub fn legacy_hash(&self) -> transaction::Hash {
        transaction::Hash(sha256d::digest(&self.0))
    }
}

impl std::fmt::Display for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("FieldElement")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// An opaque, length-prefixed SNARK proof blob.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScProof(pub Vec<u8>);

impl ScProof {
    /// Structural well-formedness: non-empty and within the verifier's
    /// declared bound.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= Self::MAX_SIZE
    }

    /// Upper bound on a serialized proof accepted from the network.
    pub const MAX_SIZE: usize = 9 * 1024;
}

impl std::fmt::Debug for ScProof {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("ScProof")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

impl WireSerialize for ScProof {
    fn wire_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.wire_serialize(writer)
    }
}

impl WireDeserialize for ScProof {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::wire_deserialize(&mut reader)?.value();
        if len as usize > Self::MAX_SIZE {
            return Err(SerializationError::Parse("sc proof too large"));
        }
        let mut bytes = Vec::with_capacity(len as usize);
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated sc proof"));
        }
        Ok(ScProof(bytes))
    }
}

/// An opaque, length-prefixed SNARK verification key.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScVk(pub Vec<u8>);

impl ScVk {
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= Self::MAX_SIZE
    }

    /// Upper bound on a serialized verification key.
    pub const MAX_SIZE: usize = 9 * 1024;
}

impl std::fmt::Debug for ScVk {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("ScVk")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

impl WireSerialize for ScVk {
    fn wire_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.wire_serialize(writer)
    }
}

impl WireDeserialize for ScVk {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::wire_deserialize(&mut reader)?.value();
        if len as usize > Self::MAX_SIZE {
            return Err(SerializationError::Parse("sc vk too large"));
        }
        let mut bytes = Vec::with_capacity(len as usize);
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated sc vk"));
        }
        Ok(ScVk(bytes))
    }
}

/// Declared size (in bits) of one custom field-element slot in the
/// certificates of a sidechain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FieldElementCertificateFieldConfig(pub u8);

impl FieldElementCertificateFieldConfig {
    pub fn is_valid(&self) -> bool {
        self.0 > 0 && (self.0 as usize) <= FIELD_ELEMENT_SIZE * 8
    }
}

/// Declared shape of one compressed bit-vector slot in the certificates of a
/// sidechain: (bit length, max compressed byte length).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BitVectorCertificateFieldConfig {
    pub bit_vector_size_bits: u32,
    pub max_compressed_size_bytes: u32,
}

impl BitVectorCertificateFieldConfig {
    /// Bit vectors must cover whole field elements.
    pub fn is_valid(&self) -> bool {
        self.bit_vector_size_bits > 0
            && self.bit_vector_size_bits % (FIELD_ELEMENT_SIZE as u32 * 8) == 0
            && self.max_compressed_size_bytes > 0
    }
}

impl WireSerialize for FieldElementCertificateFieldConfig {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.0.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for FieldElementCertificateFieldConfig {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(FieldElementCertificateFieldConfig(u8::wire_deserialize(
            reader,
        )?))
    }
}

impl WireSerialize for BitVectorCertificateFieldConfig {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.bit_vector_size_bits.wire_serialize(&mut writer)?;
        self.max_compressed_size_bytes.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for BitVectorCertificateFieldConfig {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BitVectorCertificateFieldConfig {
            bit_vector_size_bits: u32::wire_deserialize(&mut reader)?,
            max_compressed_size_bytes: u32::wire_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scid_derivation_is_deterministic_and_index_sensitive() {
        let tx = transaction::Hash(sha256d::digest(b"demo"));
        let a = Scid::derive(tx, 0);
        let b = Scid::derive(tx, 0);
        let c = Scid::derive(tx, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bit_vector_config_requires_field_element_multiples() {
        let good = BitVectorCertificateFieldConfig {
            bit_vector_size_bits: 256 * 4,
            max_compressed_size_bytes: 128,
        };
        let bad = BitVectorCertificateFieldConfig {
            bit_vector_size_bits: 100,
            max_compressed_size_bytes: 128,
        };
        assert!(good.is_valid());
        assert!(!bad.is_valid());
    }
}
