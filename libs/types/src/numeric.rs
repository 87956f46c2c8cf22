//! Fixed-point fraction types
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Percentages are expressed in basis points with a fixed denominator of
//! 10 000, range-validated at construction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Denominator of the basis-point scale: 10 000 bps == 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Numeric construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("Basis points out of range: {value} (max {})", BPS_DENOMINATOR)]
    OutOfRange { value: u32 },
}

/// A fraction in basis points, guaranteed to lie in `[0, 10000]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(u32);

impl BasisPoints {
    /// 0 bps
    pub const ZERO: BasisPoints = BasisPoints(0);
    /// 10 000 bps == 100%
    pub const FULL: BasisPoints = BasisPoints(BPS_DENOMINATOR);

    /// Construct a validated fraction. Values above 10 000 are rejected.
    pub fn new(value: u32) -> Result<Self, NumericError> {
        if value > BPS_DENOMINATOR {
            return Err(NumericError::OutOfRange { value });
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Apply the fraction to an amount: `amount * bps / 10000`.
    pub fn apply(&self, amount: Decimal) -> Decimal {
        amount * Decimal::from(self.0) / Decimal::from(BPS_DENOMINATOR)
    }

    /// Overflow-aware variant of [`apply`](Self::apply), used in settlement
    /// math where amounts are caller-provided.
    pub fn checked_apply(&self, amount: Decimal) -> Option<Decimal> {
        amount
            .checked_mul(Decimal::from(self.0))?
            .checked_div(Decimal::from(BPS_DENOMINATOR))
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Sum a list of shares, checking that they total exactly 100%.
pub fn shares_are_complete(shares: &[BasisPoints]) -> bool {
    shares.iter().map(|s| s.0 as u64).sum::<u64>() == BPS_DENOMINATOR as u64
}
