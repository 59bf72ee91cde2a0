use std::convert::TryInto;
use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::block;
use crate::serialization::{SerializationError, WireDeserialize, WireSerialize};

/// A transaction's locktime: the earliest height or time it may be
/// confirmed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LockTime {
    /// Unlocked at or after this block height.
    Height(block::Height),
    /// Unlocked at or after this time.
    Time(DateTime<Utc>),
}

impl LockTime {
    /// The smallest locktime interpreted as a timestamp rather than a
    /// height.
    pub const MIN_TIMESTAMP: i64 = 500_000_000;

    /// A locktime of zero: always final.
    pub fn unlocked() -> LockTime {
        LockTime::Height(block::Height(0))
    }

    /// Whether a transaction with this locktime and these sequence numbers
    /// is final at `height` / `block_time`.
    pub fn is_final(
        &self,
        sequences_final: bool,
        height: block::Height,
        block_time: DateTime<Utc>,
    ) -> bool {
        if sequences_final {
            return true;
        }
        match self {
            LockTime::Height(h) => h.0 < height.0,
            LockTime::Time(t) => *t < block_time,
        }
    }
}

impl WireSerialize for LockTime {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            LockTime::Height(block::Height(height)) => {
                writer.write_u32::<LittleEndian>(*height)
            }
            LockTime::Time(time) => {
                let timestamp: u32 = time
                    .timestamp()
                    .try_into()
                    .expect("locktime timestamps fit in u32 until 2106");
                writer.write_u32::<LittleEndian>(timestamp)
            }
        }
    }
}

impl WireDeserialize for LockTime {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let raw = reader.read_u32::<LittleEndian>()?;
        if (raw as i64) < LockTime::MIN_TIMESTAMP {
            Ok(LockTime::Height(block::Height(raw)))
        } else {
            Ok(LockTime::Time(Utc.timestamp(raw as i64, 0)))
        }
    }
}
