//! Fixed-point amount handling. Balances carry 4 fractional digits end to
//! end; event payloads are formatted at 2. No floating point anywhere.

use crate::errors::{Result, WalletEngineError};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Scale of persisted balances and amounts.
pub const STORED_SCALE: u32 = 4;

/// Scale of amounts in published event payloads.
pub const EVENT_SCALE: u32 = 2;

/// Largest representable movement, bounded by the NUMERIC(19,4) columns.
const MAX_INTEGRAL_DIGITS: u32 = 15;

/// Parse a caller-supplied decimal string into a stored amount.
///
/// Rejects non-decimal input, non-positive values, more than 4 fractional
/// digits, and values that would overflow the store's precision.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| WalletEngineError::Validation(format!("invalid amount: {}", raw)))?;

    if amount <= Decimal::ZERO {
        return Err(WalletEngineError::Validation(
            "amount must be strictly positive".to_string(),
        ));
    }

    if amount.normalize().scale() > STORED_SCALE {
        return Err(WalletEngineError::Validation(format!(
            "amount precision exceeds {} decimal places",
            STORED_SCALE
        )));
    }

    if amount >= Decimal::from(10i64.pow(MAX_INTEGRAL_DIGITS)) {
        return Err(WalletEngineError::Validation(
            "amount out of range".to_string(),
        ));
    }

    let mut stored = amount;
    stored.rescale(STORED_SCALE);
    Ok(stored)
}

/// Format an amount for an event payload: exactly 2 fractional digits.
pub fn event_amount(amount: Decimal) -> String {
    let mut formatted = amount.round_dp(EVENT_SCALE);
    formatted.rescale(EVENT_SCALE);
    formatted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_amount_normalizes_to_four_digits() {
        let amount = parse_amount("100.50").unwrap();
        assert_eq!(amount, dec!(100.5));
        assert_eq!(amount.scale(), STORED_SCALE);
        assert_eq!(amount.to_string(), "100.5000");
    }

    #[test]
    fn test_parse_amount_accepts_exactly_four_digits() {
        assert_eq!(parse_amount("0.0001").unwrap(), dec!(0.0001));
        // Trailing zeros beyond 4 digits are not extra precision.
        assert_eq!(parse_amount("2.500000").unwrap(), dec!(2.5000));
    }

    #[test]
    fn test_parse_amount_rejects_excess_precision() {
        assert!(parse_amount("1.00005").is_err());
        assert!(parse_amount("0.00001").is_err());
    }

    #[test]
    fn test_parse_amount_rejects_non_positive() {
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("0.0000").is_err());
        assert!(parse_amount("-5.00").is_err());
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount("").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("1.2.3").is_err());
        assert!(parse_amount("$100").is_err());
    }

    #[test]
    fn test_parse_amount_rejects_overflow() {
        assert!(parse_amount("1000000000000000").is_err());
        assert!(parse_amount("999999999999999.9999").is_ok());
    }

    #[test]
    fn test_event_amount_pads_to_two_digits() {
        assert_eq!(event_amount(dec!(70)), "70.00");
        assert_eq!(event_amount(dec!(100.5000)), "100.50");
        assert_eq!(event_amount(dec!(0.0000)), "0.00");
    }

    #[test]
    fn test_event_amount_rounds_sub_cent_values() {
        assert_eq!(event_amount(dec!(1.2350)), "1.24");
        assert_eq!(event_amount(dec!(1.2310)), "1.23");
    }
}
