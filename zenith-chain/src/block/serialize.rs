//! The on-disk and on-wire block format: a header followed by a
//! count-prefixed transaction list and a count-prefixed certificate list.

use std::{io, sync::Arc};

use super::{Block, Header};
use crate::certificate::Certificate;
use crate::serialization::{SerializationError, WireDeserialize, WireSerialize};
use crate::transaction::Transaction;

/// The maximum serialized size of a block.
pub const MAX_BLOCK_BYTES: u64 = crate::parameters::MAX_BLOCK_SIZE as u64;

impl WireSerialize for Block {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.wire_serialize(&mut writer)?;
        self.transactions.wire_serialize(&mut writer)?;
        self.certificates.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for Block {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // Bound everything read after the header by the maximum block size.
        let mut reader = reader.take(MAX_BLOCK_BYTES);
        let header = Header::wire_deserialize(&mut reader)?;

        let tx_count = crate::compactint::CompactInt::wire_deserialize(&mut reader)?.value();
        // Sanity check the count to prevent huge preallocations: every
        // transaction needs at least one input
        if tx_count > MAX_BLOCK_BYTES / (36 * 4) {
            return Err(SerializationError::Parse(
                "block contained too many transactions for each to have at least one input",
            ));
        }
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(<Arc<Transaction>>::wire_deserialize(&mut reader)?);
        }

        let cert_count = crate::compactint::CompactInt::wire_deserialize(&mut reader)?.value();
        if cert_count > MAX_BLOCK_BYTES / (36 * 4) {
            return Err(SerializationError::Parse(
                "block contained too many certificates",
            ));
        }
        let mut certificates = Vec::with_capacity(cert_count as usize);
        for _ in 0..cert_count {
            certificates.push(<Arc<Certificate>>::wire_deserialize(&mut reader)?);
        }

        Ok(Block {
            header,
            transactions,
            certificates,
        })
    }
}
