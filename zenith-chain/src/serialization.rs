//! Consensus-critical serialization.
//!
//! This module contains the `WireSerialize` and `WireDeserialize` traits,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the byte-exact consensus encoding: little-endian integers, Bitcoin
//! compact-int length prefixes, and raw byte arrays.

mod deserialize;
mod error;

pub mod sha256d;

use chrono::{DateTime, Utc};
use std::convert::TryFrom;

pub use deserialize::{WireDeserialize, WireDeserializeInto};
pub use error::SerializationError;

use crate::compactint::CompactInt;
use byteorder::{LittleEndian, WriteBytesExt};

pub trait WireSerialize {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn wire_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.wire_serialize(&mut data)?;
        Ok(data)
    }
}

impl WireSerialize for bool {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self as u8])
    }
}

impl WireSerialize for u8 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self])
    }
}

impl WireSerialize for u16 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl WireSerialize for u32 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl WireSerialize for u64 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl WireSerialize for i32 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl WireSerialize for i64 {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

impl WireSerialize for DateTime<Utc> {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        let time_u32 = u32::try_from(self.timestamp()).unwrap_or(std::u32::MAX);
        target.write_u32::<LittleEndian>(time_u32)
    }
}

impl WireSerialize for &[u8] {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

macro_rules! impl_serializable_byte_array {
    ($size:expr) => {
        impl WireSerialize for [u8; $size] {
            fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
            where
                W: std::io::Write,
            {
                target.write_all(self)
            }
        }
    };
}

impl_serializable_byte_array!(4);
impl_serializable_byte_array!(32);
impl_serializable_byte_array!(64);

/// Length-prefixed lists.
///
/// `Vec<u8>` goes through this impl one byte at a time; the bytes written
/// are identical to a bulk write after the compact-int length.
impl<T> WireSerialize for Vec<T>
where
    T: WireSerialize,
{
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).wire_serialize(&mut target)?;
        for item in self.iter() {
            item.wire_serialize(&mut target)?
        }
        Ok(())
    }
}

impl<T, U> WireSerialize for (T, U)
where
    T: WireSerialize,
    U: WireSerialize,
{
    fn wire_serialize<W>(&self, mut target: W) -> std::result::Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.0.wire_serialize(&mut target)?;
        self.1.wire_serialize(&mut target)?;
        Ok(())
    }
}

impl<T: WireSerialize> WireSerialize for std::sync::Arc<T> {
    fn wire_serialize<W>(&self, target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.as_ref().wire_serialize(target)
    }
}

/// Length-prefixed byte blobs, as used by opaque proof and key containers.
///
/// Note that `Option<T>` has no discriminant on the wire: `Some` serializes
/// its contents, `None` serializes nothing. Types with optional fields must
/// encode presence in some other field (field-element containers use an
/// explicit zero length).
impl<T: WireSerialize> WireSerialize for Option<T> {
    fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        match self {
            Some(contents) => contents.wire_serialize(&mut target),
            None => Ok(()),
        }
    }
}
