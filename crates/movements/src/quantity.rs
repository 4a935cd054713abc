//! Movement quantity and its configurable upper bound.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

/// Positive movement magnitude. Direction comes from the movement kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> DomainResult<Self> {
        if value == 0 {
            return Err(DomainError::field("qty", "qty must be greater than zero"));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Magnitude as a signed value for delta arithmetic.
    pub fn signed(self) -> i64 {
        i64::from(self.0)
    }
}

impl TryFrom<u32> for Quantity {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Largest quantity a single movement may carry.
///
/// Capped at `i32::MAX`, the width of the persisted `qty` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuantityLimit(u32);

impl QuantityLimit {
    pub const DEFAULT: QuantityLimit = QuantityLimit(100_000);
    pub const CEILING: u32 = i32::MAX as u32;

    pub fn new(max: u32) -> Option<Self> {
        (1..=Self::CEILING).contains(&max).then_some(Self(max))
    }

    pub fn max(self) -> u32 {
        self.0
    }

    /// Parse a raw (possibly negative or oversized) request value.
    pub fn parse(self, raw: i64) -> Result<Quantity, String> {
        if raw <= 0 {
            return Err("qty must be greater than zero".to_string());
        }
        if raw > i64::from(self.0) {
            return Err(format!("qty must not exceed {}", self.0));
        }
        // Bounded by `self.0`, which fits in u32.
        Ok(Quantity(raw as u32))
    }
}

impl Default for QuantityLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}
