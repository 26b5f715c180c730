//! Amount Parsing & Formatting
//!
//! Monetary amounts travel as strings matching `^\d+(\.\d{1,8})?$` and are
//! handled as fixed-point decimals internally. Binary floating point never
//! touches an amount.

use rust_decimal::Decimal;

use super::error::LedgerError;

/// Maximum fractional digits, matching the NUMERIC(19,8) columns.
pub const MAX_SCALE: u32 = 8;

/// Maximum integer digits representable in NUMERIC(19,8).
const MAX_INTEGER_DIGITS: usize = 11;

/// Parse an amount string into a strictly positive decimal.
///
/// The accepted grammar is `^\d+(\.\d{1,8})?$`, checked explicitly before
/// decimal parsing so that exponents, signs, whitespace and locale formats
/// are all rejected outright.
pub fn parse_amount(input: &str) -> Result<Decimal, LedgerError> {
    if !matches_grammar(input) {
        return Err(LedgerError::InvalidAmount(input.to_string()));
    }

    let integer_digits = input.split('.').next().unwrap_or("").len();
    if integer_digits > MAX_INTEGER_DIGITS {
        return Err(LedgerError::InvalidAmount(input.to_string()));
    }

    let amount: Decimal = input
        .parse()
        .map_err(|_| LedgerError::InvalidAmount(input.to_string()))?;

    ensure_positive(amount)?;
    Ok(amount)
}

/// Re-check an already-parsed amount: strictly positive, at most 8
/// fractional digits. The writer calls this as a last line of defence.
pub fn ensure_valid(amount: Decimal) -> Result<(), LedgerError> {
    ensure_positive(amount)?;
    if amount.scale() > MAX_SCALE && amount.normalize().scale() > MAX_SCALE {
        return Err(LedgerError::InvalidAmount(amount.to_string()));
    }
    Ok(())
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount.to_string()));
    }
    Ok(())
}

fn matches_grammar(input: &str) -> bool {
    let bytes = input.as_bytes();
    let mut parts = bytes.splitn(2, |b| *b == b'.');

    let int_part = parts.next().unwrap_or_default();
    if int_part.is_empty() || !int_part.iter().all(u8::is_ascii_digit) {
        return false;
    }

    match parts.next() {
        None => true,
        Some(frac) => {
            !frac.is_empty()
                && frac.len() <= MAX_SCALE as usize
                && frac.iter().all(u8::is_ascii_digit)
        }
    }
}

/// Render a balance for the wire: normalized so trailing fractional zeros
/// are dropped and a replayed request serializes byte-identically.
pub fn format_balance(balance: Decimal) -> String {
    balance.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_plain_integers() {
        assert_eq!(parse_amount("100").unwrap(), dec!(100));
        assert_eq!(parse_amount("1").unwrap(), dec!(1));
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(parse_amount("0.5").unwrap(), dec!(0.5));
        assert_eq!(parse_amount("12.34567890").unwrap(), dec!(12.34567890));
    }

    #[test]
    fn test_rejects_zero_and_negative() {
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("0.0").is_err());
        assert!(parse_amount("-5").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", ".", "1.", ".5", "1e5", " 1", "1 ", "+1", "1,5", "abc"] {
            assert!(parse_amount(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_rejects_excess_scale() {
        assert!(parse_amount("1.123456789").is_err());
        assert_eq!(parse_amount("1.12345678").unwrap(), dec!(1.12345678));
    }

    #[test]
    fn test_rejects_oversized_integer_part() {
        assert!(parse_amount("999999999999").is_err());
        assert!(parse_amount("99999999999").is_ok());
    }

    #[test]
    fn test_ensure_valid() {
        assert!(ensure_valid(dec!(10.5)).is_ok());
        assert!(ensure_valid(dec!(0)).is_err());
        assert!(ensure_valid(dec!(-1)).is_err());
    }

    #[test]
    fn test_format_balance_normalizes() {
        assert_eq!(format_balance(dec!(9999900.00000000)), "9999900");
        assert_eq!(format_balance(dec!(10100.0)), "10100");
        assert_eq!(format_balance(dec!(0.50000000)), "0.5");
        assert_eq!(format_balance(dec!(0.00000000)), "0");
    }
}
