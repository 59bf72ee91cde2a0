use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::serialization::{SerializationError, WireDeserialize, WireSerialize};

/// The height of a block is the length of the chain back to the genesis
/// block.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Height(pub u32);

impl Height {
    /// The minimum height: the genesis block.
    pub const MIN: Height = Height(0);

    /// The maximum height, chosen so height arithmetic cannot overflow and
    /// heights stay distinguishable from timestamps in locktimes.
    pub const MAX: Height = Height(499_999_999);
}

impl Add<u32> for Height {
    type Output = Option<Height>;

    fn add(self, rhs: u32) -> Option<Height> {
        let result = self.0.checked_add(rhs)?;
        if result <= Height::MAX.0 {
            Some(Height(result))
        } else {
            None
        }
    }
}

impl Sub<u32> for Height {
    type Output = Option<Height>;

    fn sub(self, rhs: u32) -> Option<Height> {
        self.0.checked_sub(rhs).map(Height)
    }
}

impl WireSerialize for Height {
    fn wire_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.wire_serialize(writer)
    }
}

impl WireDeserialize for Height {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        let height = u32::wire_deserialize(reader)?;
        if height > Height::MAX.0 {
            return Err(SerializationError::Parse("height out of range"));
        }
        Ok(Height(height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_arithmetic_is_checked() {
        assert_eq!(Height(100) + 1, Some(Height(101)));
        assert_eq!(Height::MAX + 1, None);
        assert_eq!(Height(0) - 1, None);
        assert_eq!(Height(101) - 100, Some(Height(1)));
    }
}
