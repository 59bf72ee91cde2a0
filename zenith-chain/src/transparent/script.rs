#![allow(clippy::unit_arg)]
use crate::{
    compactint::CompactInt,
    serialization::{SerializationError, WireDeserialize, WireSerialize},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{self, Read},
};

/// An encoding of a script.
///
/// The bytecode is kept opaque here; evaluation and standard-template
/// classification live in `zenith-script`.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl WireSerialize for Script {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).wire_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl WireDeserialize for Script {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::wire_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated script"));
        }
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod proptests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;
    use crate::serialization::{WireDeserialize, WireSerialize};

    proptest! {
        #[test]
        fn script_roundtrip(script in any::<Script>()) {
            zenith_test::init();

            let mut bytes = Cursor::new(Vec::new());
            script.wire_serialize(&mut bytes)?;

            bytes.set_position(0);
            let other_script = Script::wire_deserialize(&mut bytes)?;

            prop_assert_eq![script, other_script];
        }
    }
}
