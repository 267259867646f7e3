use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Amount in the smallest currency unit (e.g. kobo, cents).
///
/// Single-currency: the marketplace never converts or mixes currencies, so no
/// currency code is carried.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    /// `self × quantity`, rejecting negative quantities and overflow.
    pub fn checked_mul(self, quantity: i64) -> DomainResult<Money> {
        let q = u64::try_from(quantity)
            .map_err(|_| DomainError::validation("quantity must not be negative"))?;
        self.0
            .checked_mul(q)
            .map(Money)
            .ok_or_else(|| DomainError::validation("total amount overflows"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
