//! Wire encoding of transactions.
//!
//! Layout: version, inputs, outputs, locktime, then the version-gated
//! extension blocks (crosschain payload for `SC_TX_VERSION`, joinsplit data
//! for shielded-capable versions).

use std::io;

use super::{
    JoinSplitData, LockTime, SidechainPayload, Transaction, SC_TX_VERSION, SHIELDED_TX_VERSION,
};
use crate::cached::Cached;
use crate::serialization::{sha256d, SerializationError, WireDeserialize, WireSerialize};
use crate::transparent;

impl WireSerialize for Transaction {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.wire_serialize(&mut writer)?;
        self.inputs.wire_serialize(&mut writer)?;
        self.outputs.wire_serialize(&mut writer)?;
        self.locktime.wire_serialize(&mut writer)?;

        if self.version == SC_TX_VERSION {
            self.sidechain_payload
                .as_ref()
                .cloned()
                .unwrap_or_default()
                .wire_serialize(&mut writer)?;
        }
        if self.version == SHIELDED_TX_VERSION || self.version == SC_TX_VERSION {
            match &self.joinsplit_data {
                Some(data) => data.wire_serialize(&mut writer)?,
                None => {
                    // an empty joinsplit list, no key or signature follows
                    crate::compactint::CompactInt::from(0).wire_serialize(&mut writer)?;
                }
            }
        }
        Ok(())
    }
}

impl WireDeserialize for Transaction {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // Hash while reading, so the hash cache can be populated without a
        // second serialization pass.
        let mut reader = HashReader::new(reader);

        let version = i32::wire_deserialize(&mut reader)?;
        let inputs = <Vec<transparent::Input>>::wire_deserialize(&mut reader)?;
        let outputs = <Vec<transparent::Output>>::wire_deserialize(&mut reader)?;
        let locktime = LockTime::wire_deserialize(&mut reader)?;

        let sidechain_payload = if version == SC_TX_VERSION {
            let payload = SidechainPayload::wire_deserialize(&mut reader)?;
            if payload.is_empty() {
                None
            } else {
                Some(payload)
            }
        } else {
            None
        };

        let joinsplit_data = if version == SHIELDED_TX_VERSION || version == SC_TX_VERSION {
            JoinSplitData::wire_deserialize_optional(&mut reader)?
        } else {
            None
        };

        let hash = super::Hash(reader.finish());

        Ok(Transaction {
            version,
            inputs,
            outputs,
            locktime,
            joinsplit_data,
            sidechain_payload,
            hash: Cached::from(hash),
        })
    }
}

impl JoinSplitData {
    /// Deserialize a joinsplit extension block, returning `None` when the
    /// joinsplit list is empty (no key or signature follows an empty list).
    fn wire_deserialize_optional<R: io::Read>(
        mut reader: R,
    ) -> Result<Option<JoinSplitData>, SerializationError> {
        let joinsplits = <Vec<super::JoinSplit>>::wire_deserialize(&mut reader)?;
        if joinsplits.is_empty() {
            return Ok(None);
        }
        Ok(Some(JoinSplitData {
            joinsplits,
            pub_key: <[u8; 32]>::wire_deserialize(&mut reader)?,
            sig: <[u8; 64]>::wire_deserialize(&mut reader)?,
        }))
    }
}

/// An `io::Read` adapter that feeds every byte it reads through sha256d.
pub(crate) struct HashReader<R> {
    inner: R,
    writer: sha256d::Writer,
}

impl<R: io::Read> HashReader<R> {
    pub fn new(inner: R) -> HashReader<R> {
        HashReader {
            inner,
            writer: sha256d::Writer::default(),
        }
    }

    pub fn finish(self) -> [u8; 32] {
        self.writer.finish()
    }
}

impl<R: io::Read> io::Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use io::Write;
        let count = self.inner.read(buf)?;
        self.writer.write_all(&buf[..count])?;
        Ok(count)
    }
}
