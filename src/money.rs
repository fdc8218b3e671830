//! Money helpers built on `rust_decimal`.
//!
//! Every amount in the crate is a `Decimal`. SQLite stores amounts as integer
//! minor units (cents) and JSON boundaries carry `f64`, so conversions happen
//! only at those two edges. The 0.01 tolerance is applied where two amounts
//! are compared, never to stored values.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

/// Rounding strategy for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Tolerance for monetary comparisons (0.01)
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to cents, half away from zero.
#[inline]
pub fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert an `f64` coming from a JSON payload. Returns `None` for NaN/Infinity.
#[inline]
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(round)
}

/// Integer cents for storage. Amounts whose cents overflow `i64` are
/// rejected as `InvalidInput`.
#[inline]
pub fn to_minor_units(value: Decimal) -> PosResult<i64> {
    round(value)
        .checked_mul(HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| PosError::InvalidInput(format!("amount {value} is out of range")))
}

#[inline]
pub fn from_minor_units(units: i64) -> Decimal {
    Decimal::new(units, DECIMAL_PLACES)
}

#[inline]
pub fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// True when `a` and `b` differ by no more than [`MONEY_TOLERANCE`].
#[inline]
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= MONEY_TOLERANCE
}

/// Order-level discount as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Percentage of the subtotal, clamped to [0, 100].
    Percentage(Decimal),
    /// Fixed amount, clamped to [0, subtotal].
    Fixed(Decimal),
}

impl Discount {
    /// Discount amount applied to `subtotal`.
    pub fn amount_for(&self, subtotal: Decimal) -> Decimal {
        let subtotal = non_negative(subtotal);
        match *self {
            Discount::Percentage(pct) => {
                let pct = pct.clamp(Decimal::ZERO, HUNDRED);
                round(subtotal * pct / HUNDRED)
            }
            Discount::Fixed(amount) => round(amount.clamp(Decimal::ZERO, subtotal)),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().expect("valid decimal literal")
    }

    #[test]
    fn test_minor_units_round_trip_preserves_cents() {
        assert_eq!(to_minor_units(d("1545.00")).unwrap(), 154_500);
        assert_eq!(to_minor_units(d("0.015")).unwrap(), 2);
        assert_eq!(from_minor_units(154_500), d("1545.00"));
        assert_eq!(from_minor_units(-500), d("-5.00"));
    }

    #[test]
    fn test_minor_units_reject_overflow() {
        assert!(matches!(
            to_minor_units(d("100000000000000000")),
            Err(PosError::InvalidInput(_))
        ));
        assert!(to_minor_units(Decimal::MAX).is_err());
        assert_eq!(to_minor_units(d("92233720368547758.07")).unwrap(), i64::MAX);
    }

    #[test]
    fn test_to_decimal_rejects_non_finite() {
        assert_eq!(to_decimal(f64::NAN), None);
        assert_eq!(to_decimal(f64::INFINITY), None);
        assert_eq!(to_decimal(0.1 + 0.2), Some(d("0.30")));
    }

    #[test]
    fn test_approx_eq_uses_one_cent_tolerance() {
        assert!(approx_eq(d("250.00"), d("250.01")));
        assert!(approx_eq(d("250.00"), d("249.99")));
        assert!(!approx_eq(d("250.00"), d("250.02")));
    }

    #[test]
    fn test_percentage_discount_is_clamped() {
        let subtotal = d("80.00");
        assert_eq!(Discount::Percentage(d("25")).amount_for(subtotal), d("20.00"));
        assert_eq!(Discount::Percentage(d("150")).amount_for(subtotal), d("80.00"));
        assert_eq!(Discount::Percentage(d("-10")).amount_for(subtotal), Decimal::ZERO);
    }

    #[test]
    fn test_fixed_discount_is_clamped_to_subtotal() {
        let subtotal = d("30.00");
        assert_eq!(Discount::Fixed(d("12.50")).amount_for(subtotal), d("12.50"));
        assert_eq!(Discount::Fixed(d("45.00")).amount_for(subtotal), d("30.00"));
        assert_eq!(Discount::Fixed(d("-3.00")).amount_for(subtotal), Decimal::ZERO);
    }
}
