//! Fixed-point money helpers.
//!
//! Wire/API values are `rust_decimal::Decimal` (scale up to 18 fractional
//! digits, matching the `decimal(32,18)` columns from the spec). Ledger and
//! vault aggregates sum balances as `i64` minor units internally, per the
//! invariant that the two representations never mix within one aggregate.

use rust_decimal::Decimal;

/// Minor-unit scale used by ledger/vault aggregates (cents = 10^2).
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Converts a wire decimal amount into integer minor units, rounding toward
/// zero. Fractional digits beyond the minor-unit scale are truncated, never
/// silently accumulated as float drift.
pub fn to_minor_units(amount: Decimal) -> i64 {
    let scaled = amount.round_dp(MINOR_UNIT_SCALE) * Decimal::from(10i64.pow(MINOR_UNIT_SCALE));
    scaled.trunc().to_string().parse::<i64>().unwrap_or(0)
}

/// Converts integer minor units back to a wire decimal amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Parses a decimal amount and rejects non-positive values, matching the
/// `INVALID_ARGUMENT` precondition shared by most mutating operations.
pub fn parse_positive_amount(raw: &str) -> Result<Decimal, crate::errors::CoreError> {
    use crate::errors::CoreError;
    let amount: Decimal = raw
        .parse()
        .map_err(|_| CoreError::InvalidArgument(format!("malformed decimal amount: {raw}")))?;
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidArgument(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_minor_units() {
        let amount = Decimal::new(100000, 2); // 1000.00
        assert_eq!(to_minor_units(amount), 100_000);
        assert_eq!(from_minor_units(100_000), amount);
    }

    #[test]
    fn truncates_sub_cent_precision() {
        let amount: Decimal = "10.005".parse().unwrap();
        assert_eq!(to_minor_units(amount), 1000); // truncates to 10.00
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(parse_positive_amount("0").is_err());
        assert!(parse_positive_amount("-5.00").is_err());
        assert!(parse_positive_amount("not-a-number").is_err());
        assert!(parse_positive_amount("5.00").is_ok());
    }
}
