use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a ledger amount string exactly. Accepts up to 28 fractional digits.
pub fn parse_amount(amount: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(amount.trim())
}

/// Render an amount without trailing zeros, and `0` for negative zero.
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}
