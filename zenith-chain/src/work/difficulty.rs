//! Block difficulty data structures and calculations.
//!
//! The block difficulty "target threshold" is stored in the block header as a
//! 32-bit `CompactDifficulty`. The `block::Hash` must be less than or equal
//! to the `ExpandedDifficulty` threshold, when both are treated as 256-bit
//! integers in the same byte order.

use crate::{block, parameters::Network};
use crate::{SerializationError, WireDeserialize, WireSerialize};

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A 32-bit "compact bits" value, the header encoding of the difficulty
/// threshold.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(pub u32);

impl std::fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

/// A 256-bit unsigned "expanded difficulty" value.
///
/// Greater values represent *less* work.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

/// A measurement of the work done by a block or chain of blocks.
///
/// Invariant: `Work` is the floor of `2^256 / (expanded + 1)`, so chain work
/// sums never overflow a `u128` on any realistic chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Work(pub u128);

impl std::ops::Add for Work {
    type Output = Work;
    fn add(self, rhs: Work) -> Work {
        Work(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Work {
    fn add_assign(&mut self, rhs: Work) {
        self.0 += rhs.0;
    }
}

impl CompactDifficulty {
    /// The precision of the compact mantissa.
    const PRECISION: u32 = 24;

    /// The offset used to convert a compact mantissa into a signed value.
    const SIGN_BIT: u32 = 1 << (CompactDifficulty::PRECISION - 1);

    /// The mask used to strip the sign bit from a compact mantissa.
    const UNSIGNED_MANTISSA_MASK: u32 = CompactDifficulty::SIGN_BIT - 1;

    /// Calculate the `ExpandedDifficulty` for this compact representation.
    ///
    /// Returns None for negative, zero, and overflowing values.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        let exponent = self.0 >> CompactDifficulty::PRECISION;
        let mantissa = self.0 & CompactDifficulty::UNSIGNED_MANTISSA_MASK;

        if self.0 & CompactDifficulty::SIGN_BIT != 0 || mantissa == 0 {
            return None;
        }

        // `(2^256 - 1) >> 24 >= mantissa << (8 * (exponent - 3))` must hold,
        // or the value overflows
        let result = if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent)))
        } else {
            let shift = 8 * (exponent - 3);
            if shift > 256 - 24 {
                return None;
            }
            U256::from(mantissa) << shift
        };

        if result.is_zero() {
            None
        } else {
            Some(ExpandedDifficulty(result))
        }
    }

    /// Calculate the `Work` for this difficulty, if it is valid.
    pub fn to_work(self) -> Option<Work> {
        let expanded = self.to_expanded()?;

        // `work = 2^256 / (expanded + 1)`, calculated without overflowing
        // 2^256 by the usual `~x / (x + 1) + 1` trick.
        let result = (!expanded.0 / (expanded.0 + 1)) + 1;
        if result <= u128::MAX.into() {
            return Some(Work(result.as_u128()));
        }
        None
    }
}

impl ExpandedDifficulty {
    /// Returns the easiest target difficulty allowed on `network`.
    pub fn target_difficulty_limit(network: Network) -> ExpandedDifficulty {
        let limit: U256 = match network {
            // `PoWLimit` as standardized for the main and test networks
            Network::Mainnet => (U256::one() << 243) - 1,
            Network::Testnet => (U256::one() << 251) - 1,
            // Regtest accepts almost any hash
            Network::Regtest => (U256::one() << 255) - 1,
        };
        ExpandedDifficulty(limit)
    }

    /// Hashes are compared to difficulty thresholds in little-endian byte
    /// order, as 256-bit integers.
    fn from_hash(hash: &block::Hash) -> ExpandedDifficulty {
        ExpandedDifficulty(U256::from_little_endian(&hash.0))
    }
}

impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        self == &ExpandedDifficulty::from_hash(other)
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<Ordering> {
        self.partial_cmp(&ExpandedDifficulty::from_hash(other))
    }
}

impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        other == self
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        use Ordering::*;
        // Use the canonical implementation, but reverse the order.
        match other.partial_cmp(self) {
            Some(Less) => Some(Greater),
            Some(Greater) => Some(Less),
            Some(Equal) => Some(Equal),
            None => None,
        }
    }
}

impl std::fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(buf))
            .finish()
    }
}

impl WireSerialize for CompactDifficulty {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.wire_serialize(target)
    }
}

impl WireDeserialize for CompactDifficulty {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::wire_deserialize(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_difficulty_rejects_sign_bit_and_zero_mantissa() {
        assert_eq!(CompactDifficulty(0x00800000).to_expanded(), None);
        assert_eq!(CompactDifficulty(0x04000000).to_expanded(), None);
    }

    #[test]
    fn bitcoin_genesis_threshold_expands() {
        // the original "bits" value of the Bitcoin genesis block
        let expanded = CompactDifficulty(0x1d00ffff).to_expanded().unwrap();
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Mainnet);
        assert!(expanded < limit);
    }

    #[test]
    fn work_is_monotonic_in_difficulty() {
        let easy = CompactDifficulty(0x1d00ffff).to_work().unwrap();
        let hard = CompactDifficulty(0x1c00ffff).to_work().unwrap();
        assert!(hard > easy);
    }

    #[test]
    fn hash_compares_against_threshold() {
        let threshold = CompactDifficulty(0x1d00ffff).to_expanded().unwrap();
        let low_hash = block::Hash([0; 32]);
        let mut high_bytes = [0xff; 32];
        high_bytes[31] = 0x7f;
        let high_hash = block::Hash(high_bytes);

        assert!(low_hash < threshold);
        assert!(high_hash > threshold);
    }
}
