//! Request validation utilities.
//!
//! Outbound requests are checked here before anything is wrapped or published.

use crate::types::{Error, Result};

/// Validate that a string is not empty or whitespace.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.trim().is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate that a value is finite and strictly positive.
pub fn validate_positive(n: f64, field: &str) -> Result<()> {
    if !n.is_finite() || n <= 0.0 {
        return Err(Error::validation(format!("{} must be positive", field)));
    }
    Ok(())
}

/// Validate that `n` lies in `min..=max`.
pub fn validate_range<T: PartialOrd + std::fmt::Display>(n: T, min: T, max: T, field: &str) -> Result<()> {
    if n < min || n > max {
        return Err(Error::validation(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, n
        )));
    }
    Ok(())
}

/// Validate a lightning invoice or address: non-empty, no whitespace.
pub fn validate_invoice(invoice: &str) -> Result<()> {
    validate_non_empty(invoice, "invoice")?;
    if invoice.chars().any(char::is_whitespace) {
        return Err(Error::validation("invoice cannot contain whitespace"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert!(validate_non_empty("USD", "fiat_code").is_ok());
        assert!(validate_non_empty("  ", "fiat_code").is_err());
    }

    #[test]
    fn test_positive_rejects_zero_and_nan() {
        assert!(validate_positive(0.5, "x").is_ok());
        assert!(validate_positive(0.0, "x").is_err());
        assert!(validate_positive(f64::NAN, "x").is_err());
        assert!(validate_positive(-1.0, "x").is_err());
    }

    #[test]
    fn test_range_message() {
        let err = validate_range(6u8, 1, 5, "rating").unwrap_err();
        assert_eq!(err.to_string(), "validation error: rating must be between 1 and 5, got 6");
        assert!(validate_range(5u8, 1, 5, "rating").is_ok());
    }

    #[test]
    fn test_invoice() {
        assert!(validate_invoice("lnbcrt500u1p3l8").is_ok());
        assert!(validate_invoice("lnbc 1").is_err());
        assert!(validate_invoice("").is_err());
    }
}
