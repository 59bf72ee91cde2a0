//! Transparent (Bitcoin-inherited) transaction inputs and outputs.
#![allow(clippy::unit_arg)]

mod address;
mod script;
mod serialize;

pub use address::Address;
pub use script::Script;

use crate::{
    amount::{Amount, NonNegative},
    block, cached::Cached, compactint::CompactInt, transaction,
};

use serde::{Deserialize, Serialize};

/// Arbitrary data inserted by miners into a coinbase transaction.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseData(
    /// Invariant: this vec must be at most 100 bytes.
    ///
    /// We enforce this by only constructing CoinbaseData fields from parsed
    /// blocks with in-range data fields, and by the coinbase shape check at
    /// admission.
    pub(crate) Vec<u8>,
);

impl CoinbaseData {
    pub fn new(data: Vec<u8>) -> CoinbaseData {
        CoinbaseData(data)
    }

    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }
}

impl AsRef<[u8]> for CoinbaseData {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for CoinbaseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let escaped = String::from_utf8(
            self.0
                .iter()
                .cloned()
                .flat_map(std::ascii::escape_default)
                .collect(),
        )
        .expect("ascii::escape_default produces utf8");
        f.debug_tuple("CoinbaseData").field(&escaped).finish()
    }
}

/// OutPoint
///
/// A particular transaction output reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// References the transaction or certificate that contains the output
    /// being spent.
    pub hash: transaction::Hash,

    /// Identifies which output from that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    #[inline]
    pub const fn len() -> usize {
        36
    }

    /// The null reference used by coinbase inputs.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == transaction::Hash([0; 32]) && self.index == u32::MAX
    }
}

/// A transparent input to a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// A reference to an output of a previous transaction.
    PrevOut {
        /// The previous output transaction reference.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The sequence number for the output.
        sequence: u32,
    },
    /// New coins created by the block reward.
    Coinbase {
        /// The height of this block, parsed from the coinbase data.
        ///
        /// Wrapped in an explicit option to make it clear that not all
        /// blocks have a height encoded.
        height: Option<Cached<block::Height>>,
        /// Free data inserted by miners. Includes the block height.
        data: CoinbaseData,
        /// The sequence number for the output.
        sequence: u32,
    },
}

impl Input {
    /// The outpoint spent by this input, unless it is a coinbase input.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Input::PrevOut { outpoint, .. } => Some(*outpoint),
            Input::Coinbase { .. } => None,
        }
    }

    /// The serialized length (in bytes) of this input.
    pub fn len(&self) -> usize {
        match *self {
            Input::PrevOut {
                ref unlock_script, ..
            } => OutPoint::len() + unlock_script.serialized_size() + 4,
            Input::Coinbase { ref data, .. } => OutPoint::len() + data.serialized_size() + 4,
        }
    }
}

/// A transparent output from a transaction.
///
/// The most fundamental building block of a transaction is a transaction
/// output. The coins you own are in fact a subset of unspent transaction
/// outputs of the global UTXO set.
///
/// UTXOs are indivisible, discrete units of value which can only be consumed
/// in their entirety.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct Output {
    /// Transaction value.
    pub value: Amount<NonNegative>,

    /// The lock script defines the conditions under which this output can be
    /// spent.
    pub lock_script: Script,
}

impl Output {
    /// Returns the serialized length (in bytes) of this Output
    pub fn len(&self) -> usize {
        8 + self.lock_script.serialized_size()
    }

    /// The dust threshold for this output under `min_relay_fee`
    /// (zatoshi/kB): an output is dust if the fee needed to spend it exceeds
    /// a third of its value.
    pub fn dust_threshold(&self, min_relay_fee: u64) -> u64 {
        // size of the output plus a conservative 148 bytes to spend it
        let total_size = self.len() as u64 + 148;
        3 * (total_size * min_relay_fee / 1000)
    }

    pub fn is_dust(&self, min_relay_fee: u64) -> bool {
        u64::from(self.value) < self.dust_threshold(min_relay_fee)
    }
}
