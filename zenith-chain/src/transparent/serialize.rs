//! Wire encodings for transparent inputs and outputs.
//!
//! Coinbase inputs are not distinguished on the wire: they are ordinary
//! inputs whose previous-output reference is null. We encode that knowledge
//! here so the rest of the codebase can work with the explicit `Input` enum.

use std::io;

use super::{CoinbaseData, Input, OutPoint, Output, Script};
use crate::{
    block, cached::Cached, serialization::{SerializationError, WireDeserialize, WireSerialize},
};

impl WireSerialize for OutPoint {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.hash.wire_serialize(&mut writer)?;
        self.index.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for OutPoint {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: crate::transaction::Hash::wire_deserialize(&mut reader)?,
            index: u32::wire_deserialize(&mut reader)?,
        })
    }
}

impl WireSerialize for Input {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.wire_serialize(&mut writer)?;
                unlock_script.wire_serialize(&mut writer)?;
                sequence.wire_serialize(&mut writer)
            }
            Input::Coinbase { data, sequence, .. } => {
                OutPoint::null().wire_serialize(&mut writer)?;
                Script(data.0.clone()).wire_serialize(&mut writer)?;
                sequence.wire_serialize(&mut writer)
            }
        }
    }
}

impl WireDeserialize for Input {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::wire_deserialize(&mut reader)?;
        let script = Script::wire_deserialize(&mut reader)?;
        let sequence = u32::wire_deserialize(&mut reader)?;

        if outpoint.is_null() {
            if script.0.len() > 100 {
                return Err(SerializationError::Parse("coinbase data is too long"));
            }
            let height = parse_coinbase_height(&script.0);
            Ok(Input::Coinbase {
                height,
                data: CoinbaseData(script.0),
                sequence,
            })
        } else {
            Ok(Input::PrevOut {
                outpoint,
                unlock_script: script,
                sequence,
            })
        }
    }
}

/// Parse the block height from the first push of the coinbase data, if it is
/// minimally encoded.
fn parse_coinbase_height(data: &[u8]) -> Option<Cached<block::Height>> {
    let (&len, rest) = data.split_first()?;
    // single-byte heights use the small-integer opcodes
    if (0x51..=0x60).contains(&len) {
        return Some(Cached::from(block::Height((len - 0x50) as u32)));
    }
    if !(1..=4).contains(&len) || rest.len() < len as usize {
        return None;
    }
    let mut height: u32 = 0;
    for (i, &byte) in rest[..len as usize].iter().enumerate() {
        height |= (byte as u32) << (8 * i);
    }
    // reject non-minimal encodings
    if len > 1 && rest[len as usize - 1] == 0 {
        return None;
    }
    Some(Cached::from(block::Height(height)))
}

impl WireSerialize for Output {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.value.wire_serialize(&mut writer)?;
        self.lock_script.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for Output {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: WireDeserialize::wire_deserialize(&mut reader)?,
            lock_script: Script::wire_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    #[test]
    fn coinbase_input_roundtrips_through_null_prevout() {
        let input = Input::Coinbase {
            height: Some(Cached::from(block::Height(101))),
            data: CoinbaseData(vec![0x01, 0x65]),
            sequence: 0xffff_ffff,
        };
        let bytes = input.wire_serialize_to_vec().unwrap();
        let parsed = Input::wire_deserialize(&bytes[..]).unwrap();
        match parsed {
            Input::Coinbase { height, .. } => {
                assert_eq!(height.unwrap().value(), Some(block::Height(101)));
            }
            _ => panic!("expected coinbase input"),
        }
    }

    #[test]
    fn output_roundtrip() {
        let output = Output {
            value: 1_249_990_000i64.try_into().unwrap(),
            lock_script: Script(vec![0x76, 0xa9]),
        };
        let bytes = output.wire_serialize_to_vec().unwrap();
        assert_eq!(Output::wire_deserialize(&bytes[..]).unwrap(), output);
    }
}
