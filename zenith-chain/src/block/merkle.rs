//! The Merkle tree binding a block header to its transactions and
//! certificates.

use std::{fmt, iter::FromIterator};

use serde::{Deserialize, Serialize};
use wire_serde_derive::{WireDeser, WireSer};

use crate::serialization::{sha256d, SerializationError, WireDeserialize, WireSerialize};
use crate::transaction;

/// The root of the Merkle tree over a block's contents.
///
/// Note that because of a flaw inherited from Bitcoin's design, the root
/// does not always precisely bind the contents of the block
/// (CVE-2012-2459): duplicate entries can produce the same root. Callers
/// must reject blocks with duplicate hashes separately.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, WireSer, WireDeser)]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(self.0))
            .finish()
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(left);
    preimage[32..].copy_from_slice(right);
    sha256d::digest(&preimage)
}

impl FromIterator<transaction::Hash> for Root {
    /// Compute the Merkle root of an ordered list of hashes.
    ///
    /// An empty list produces the all-zero root; odd levels duplicate their
    /// last entry, as in Bitcoin.
    fn from_iter<I: IntoIterator<Item = transaction::Hash>>(hashes: I) -> Self {
        let mut level: Vec<[u8; 32]> = hashes.into_iter().map(|hash| hash.0).collect();

        if level.is_empty() {
            return Root([0; 32]);
        }

        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(hash_pair(&pair[0], right));
            }
            level = next;
        }

        Root(level[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_root_is_the_entry() {
        let hash = transaction::Hash([0x42; 32]);
        let root: Root = std::iter::once(hash).collect();
        assert_eq!(root.0, hash.0);
    }

    #[test]
    fn odd_level_duplicates_last_entry() {
        let a = transaction::Hash([1; 32]);
        let b = transaction::Hash([2; 32]);
        let c = transaction::Hash([3; 32]);

        let root_abc: Root = vec![a, b, c].into_iter().collect();
        let root_abcc: Root = vec![a, b, c, c].into_iter().collect();
        assert_eq!(root_abc, root_abcc);
    }

    #[test]
    fn order_matters() {
        let a = transaction::Hash([1; 32]);
        let b = transaction::Hash([2; 32]);

        let root_ab: Root = vec![a, b].into_iter().collect();
        let root_ba: Root = vec![b, a].into_iter().collect();
        assert_ne!(root_ab, root_ba);
    }
}
