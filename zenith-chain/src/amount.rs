//! Strongly-typed zatoshi amounts that prevent under/overflows.
//!
//! The [`Amount`] type is parameterized by a [`Constraint`] implementation
//! that declares the range of allowed values. In contexts that need signed
//! deltas (fee arithmetic, balance adjustments), use
//! [`Amount<NegativeAllowed>`]; in contexts that only allow nonnegative
//! monetary values (outputs, balances), use [`Amount<NonNegative>`].

use std::{
    convert::{TryFrom, TryInto},
    marker::PhantomData,
    ops,
};

use serde::{Deserialize, Serialize};

use crate::{SerializationError, WireDeserialize, WireSerialize};

/// The number of zatoshi in one coin.
pub const COIN: i64 = 100_000_000;

/// The maximum amount of money that can ever exist, in zatoshi.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

type Result<T> = std::result::Result<T, Error>;

/// A runtime validated type for representing amounts of zatoshi
#[derive(Serialize, Deserialize)]
#[serde(bound = "C: Constraint")]
pub struct Amount<C = NegativeAllowed>(i64, PhantomData<C>);

impl<C> std::fmt::Debug for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(&format!("Amount<{}>", std::any::type_name::<C>()))
            .field(&self.0)
            .finish()
    }
}

impl<C> std::fmt::Display for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<C> Amount<C> {
    /// Convert this amount to a different Amount type if it satisfies the
    /// new constraint
    pub fn constrain<C2: Constraint>(self) -> Result<Amount<C2>> {
        self.0.try_into()
    }

    /// The raw value of this amount, in zatoshi.
    pub fn zatoshi(&self) -> i64 {
        self.0
    }

    /// Returns true if this amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl<C: Constraint> Amount<C> {
    /// A zero amount. Zero satisfies every constraint.
    pub fn zero() -> Amount<C> {
        0i64.try_into().expect("zero is always valid")
    }
}

impl<C> std::cmp::PartialEq for Amount<C> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<C> std::cmp::Eq for Amount<C> {}

impl<C> std::cmp::PartialOrd for Amount<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.0.cmp(&other.0))
    }
}

impl<C> std::cmp::Ord for Amount<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<C> Clone for Amount<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Amount<C> {}

impl<C> std::hash::Hash for Amount<C> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<C> From<Amount<C>> for i64 {
    fn from(amount: Amount<C>) -> Self {
        amount.0
    }
}

impl From<Amount<NonNegative>> for u64 {
    fn from(amount: Amount<NonNegative>) -> Self {
        amount.0 as _
    }
}

impl<C: Constraint> TryFrom<i64> for Amount<C> {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        C::validate(value).map(|v| Self(v, PhantomData))
    }
}

impl<C: Constraint> TryFrom<u64> for Amount<C> {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        let value = value
            .try_into()
            .map_err(|_| Error::Invalid { value: i64::MAX })?;
        C::validate(value).map(|v| Self(v, PhantomData))
    }
}

impl<C1, C2: Constraint> ops::Add<Amount<C1>> for Amount<C2> {
    type Output = Result<Amount<C2>>;

    fn add(self, rhs: Amount<C1>) -> Self::Output {
        let value = self
            .0
            .checked_add(rhs.0)
            .ok_or(Error::Overflow)?;
        value.try_into()
    }
}

impl<C1, C2: Constraint> ops::Add<Amount<C1>> for Result<Amount<C2>> {
    type Output = Result<Amount<C2>>;

    fn add(self, rhs: Amount<C1>) -> Self::Output {
        self? + rhs
    }
}

impl<C1, C2: Constraint> ops::Add<Result<Amount<C1>>> for Amount<C2> {
    type Output = Result<Amount<C2>>;

    fn add(self, rhs: Result<Amount<C1>>) -> Self::Output {
        self + rhs?
    }
}

impl<C1, C2: Constraint> ops::Sub<Amount<C1>> for Amount<C2> {
    type Output = Result<Amount<C2>>;

    fn sub(self, rhs: Amount<C1>) -> Self::Output {
        let value = self
            .0
            .checked_sub(rhs.0)
            .ok_or(Error::Overflow)?;
        value.try_into()
    }
}

impl<C1, C2: Constraint> ops::Sub<Amount<C1>> for Result<Amount<C2>> {
    type Output = Result<Amount<C2>>;

    fn sub(self, rhs: Amount<C1>) -> Self::Output {
        self? - rhs
    }
}

impl<'a, C: Constraint + 'a> std::iter::Sum<&'a Amount<C>> for Result<Amount<C>> {
    fn sum<I: Iterator<Item = &'a Amount<C>>>(iter: I) -> Self {
        let mut total: i64 = 0;
        for amount in iter {
            total = total.checked_add(amount.0).ok_or(Error::Overflow)?;
            // catch running sums that escape the constraint early
            C::validate(total).map_err(|_| Error::SumOutOfRange { value: total })?;
        }
        total.try_into()
    }
}

/// Errors that can be returned when validating `Amount`s
#[derive(thiserror::Error, Debug, displaydoc::Display, Clone, PartialEq, Eq)]
pub enum Error {
    /// amount {value} is outside of the valid range
    Invalid { value: i64 },
    /// arithmetic on amounts overflowed i64
    Overflow,
    /// running sum {value} escaped the valid range
    SumOutOfRange { value: i64 },
}

/// Marker type for `Amount` that allows negative values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NegativeAllowed;

impl Constraint for NegativeAllowed {
    fn valid_range() -> ops::RangeInclusive<i64> {
        -MAX_MONEY..=MAX_MONEY
    }
}

/// Marker type for `Amount` that requires nonnegative values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NonNegative;

impl Constraint for NonNegative {
    fn valid_range() -> ops::RangeInclusive<i64> {
        0..=MAX_MONEY
    }
}

/// The constraint applied to amount values.
pub trait Constraint {
    /// The range of values that are valid under this constraint.
    fn valid_range() -> ops::RangeInclusive<i64>;

    /// Check if an input value is within the valid range
    fn validate(value: i64) -> Result<i64> {
        let range = Self::valid_range();

        if !range.contains(&value) {
            Err(Error::Invalid { value })
        } else {
            Ok(value)
        }
    }
}

impl<C> WireSerialize for Amount<C> {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> std::result::Result<(), std::io::Error> {
        self.0.wire_serialize(target)
    }
}

impl<C: Constraint> WireDeserialize for Amount<C> {
    fn wire_deserialize<R: std::io::Read>(
        reader: R,
    ) -> std::result::Result<Self, SerializationError> {
        let value = i64::wire_deserialize(reader)?;
        value
            .try_into()
            .map_err(|_| SerializationError::Parse("amount out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_within_range() {
        let one: Amount<NonNegative> = 1i64.try_into().unwrap();
        let two: Amount<NonNegative> = 2i64.try_into().unwrap();
        assert_eq!((one + one).unwrap(), two);
    }

    #[test]
    fn add_breaching_max_money_fails() {
        let max: Amount<NonNegative> = MAX_MONEY.try_into().unwrap();
        let one: Amount<NonNegative> = 1i64.try_into().unwrap();
        assert!((max + one).is_err());
    }

    #[test]
    fn subtract_to_negative_fails_nonnegative() {
        let one: Amount<NonNegative> = 1i64.try_into().unwrap();
        let two: Amount<NonNegative> = 2i64.try_into().unwrap();
        assert!((one - two).is_err());
    }

    #[test]
    fn subtract_to_negative_allowed_with_negative_constraint() {
        let one: Amount<NegativeAllowed> = 1i64.try_into().unwrap();
        let two: Amount<NegativeAllowed> = 2i64.try_into().unwrap();
        let minus_one: Amount<NegativeAllowed> = (-1i64).try_into().unwrap();
        assert_eq!((one - two).unwrap(), minus_one);
    }

    #[test]
    fn sum_stays_in_range() {
        let values: Vec<Amount<NonNegative>> = vec![
            MAX_MONEY.try_into().unwrap(),
            1i64.try_into().unwrap(),
        ];
        let sum: Result<Amount<NonNegative>> = values.iter().sum();
        assert!(sum.is_err());
    }

    #[test]
    fn constrain_between_types() {
        let neg: Amount<NegativeAllowed> = (-1i64).try_into().unwrap();
        assert!(neg.constrain::<NonNegative>().is_err());

        let pos: Amount<NegativeAllowed> = 42i64.try_into().unwrap();
        assert_eq!(pos.constrain::<NonNegative>().unwrap().zatoshi(), 42);
    }
}
