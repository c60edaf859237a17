//! Exact fixed-point decimals for money and quantities.
//!
//! Binary floating point never appears here: every value is a
//! `rust_decimal::Decimal` pinned to a fixed number of fractional digits.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Fractional digits carried by ledger amounts.
pub const AMOUNT_SCALE: u32 = 2;
/// Fractional digits carried by stock quantities.
pub const QUANTITY_SCALE: u32 = 3;

/// Signed decimal with exactly `SCALE` fractional digits.
///
/// Construction rejects values that need more than `SCALE` digits and
/// rescales everything else, so `10`, `10.0` and `10.00` are the same
/// `Fixed<2>` and all display as `10.00`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Fixed<const SCALE: u32>(Decimal);

/// Ledger money: 2 fractional digits.
pub type Amount = Fixed<AMOUNT_SCALE>;

/// Stock quantity: 3 fractional digits.
pub type Quantity = Fixed<QUANTITY_SCALE>;

/// Integer digits that fit the column backing each scale: `NUMERIC(20, 2)`
/// for amounts, `NUMERIC(15, 3)` for quantities.
const fn integer_digits(scale: u32) -> u32 {
    match scale {
        AMOUNT_SCALE => 18,
        QUANTITY_SCALE => 12,
        other => 28 - other,
    }
}

impl<const SCALE: u32> Fixed<SCALE> {
    pub const ZERO: Self = Self(Decimal::from_parts(0, 0, 0, false, SCALE));

    /// Largest number of digits before the decimal point.
    pub const INTEGER_DIGITS: u32 = integer_digits(SCALE);

    /// Validate and rescale an arbitrary decimal.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.normalize().scale() > SCALE {
            return Err(DomainError::validation(format!(
                "{value} has more than {SCALE} decimal places"
            )));
        }
        Self::bounded(value)
    }

    /// Absolute values must stay below `10^INTEGER_DIGITS`.
    fn bounded(value: Decimal) -> DomainResult<Self> {
        let limit = Decimal::from_i128_with_scale(10i128.pow(Self::INTEGER_DIGITS), 0);
        if value.abs() >= limit {
            return Err(DomainError::validation(format!(
                "{value} exceeds {} integer digits",
                Self::INTEGER_DIGITS
            )));
        }
        let mut scaled = value;
        scaled.rescale(SCALE);
        Ok(Self(scaled))
    }

    /// Build from an integer count of the smallest unit (cents, thousandths).
    pub fn from_minor(units: i64) -> Self {
        Self(Decimal::new(units, SCALE))
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid decimal '{s}': {e}")))?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Sum that fails instead of leaving the storable range.
    pub fn checked_add(self, rhs: Self) -> DomainResult<Self> {
        self.0
            .checked_add(rhs.0)
            .and_then(|v| Self::bounded(v).ok())
            .ok_or_else(|| DomainError::validation(format!("{self} + {rhs} overflows")))
    }

    /// Difference that fails instead of leaving the storable range.
    pub fn checked_sub(self, rhs: Self) -> DomainResult<Self> {
        self.0
            .checked_sub(rhs.0)
            .and_then(|v| Self::bounded(v).ok())
            .ok_or_else(|| DomainError::validation(format!("{self} - {rhs} overflows")))
    }

    /// Checked total of `values`; the first out-of-range partial sum fails.
    pub fn checked_sum<I>(values: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        values.into_iter().try_fold(Self::ZERO, Self::checked_add)
    }
}

impl<const SCALE: u32> Default for Fixed<SCALE> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const SCALE: u32> TryFrom<Decimal> for Fixed<SCALE> {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const SCALE: u32> From<Fixed<SCALE>> for Decimal {
    fn from(value: Fixed<SCALE>) -> Self {
        value.0
    }
}

impl<const SCALE: u32> FromStr for Fixed<SCALE> {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<const SCALE: u32> core::fmt::Display for Fixed<SCALE> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

// Sums and differences of equally scaled decimals keep the scale. The
// operators assume in-range operands; engine paths use `checked_add`.
impl<const SCALE: u32> Add for Fixed<SCALE> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl<const SCALE: u32> Sub for Fixed<SCALE> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<const SCALE: u32> Neg for Fixed<SCALE> {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl<const SCALE: u32> AddAssign for Fixed<SCALE> {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<const SCALE: u32> SubAssign for Fixed<SCALE> {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl<const SCALE: u32> Sum for Fixed<SCALE> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl<'a, const SCALE: u32> Sum<&'a Fixed<SCALE>> for Fixed<SCALE> {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + *x)
    }
}
