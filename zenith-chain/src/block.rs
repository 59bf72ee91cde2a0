//! Blocks and block-related structures (heights, headers, etc.)
#![allow(clippy::unit_arg)]

mod hash;
mod header;
mod height;
mod serialize;

pub mod merkle;

#[cfg(test)]
mod tests;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub use hash::Hash;
pub use header::{BlockTimeError, EquihashSolution, Header};
pub use height::Height;
pub use serialize::MAX_BLOCK_BYTES;

use crate::{certificate::Certificate, fmt::DisplayToDebug, transaction::Transaction, transparent};

/// A block: a header, a list of transactions, and a list of withdrawal
/// certificates.
///
/// The two lists are kept separate on the wire and in memory; within a
/// block, all certificates come after all transactions, ordered by scid and
/// ascending quality.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
    /// The block certificates.
    pub certificates: Vec<Arc<Certificate>>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fmter = f.debug_struct("Block");
        if let Some(height) = self.coinbase_height() {
            fmter.field("height", &height);
        }

        fmter.field("hash", &DisplayToDebug(self.hash())).finish()
    }
}

impl Block {
    /// Return the block height reported in the coinbase transaction, if any.
    pub fn coinbase_height(&self) -> Option<Height> {
        self.transactions
            .get(0)
            .and_then(|tx| tx.inputs.get(0))
            .and_then(|input| match input {
                transparent::Input::Coinbase { ref height, .. } => {
                    height.and_then(|cached| cached.value())
                }
                _ => None,
            })
    }

    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// The merkle root covering both transactions and certificates, in block
    /// order.
    pub fn merkle_root(&self) -> merkle::Root {
        self.transactions
            .iter()
            .map(|tx| tx.hash())
            .chain(self.certificates.iter().map(|cert| cert.hash()))
            .collect()
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}
