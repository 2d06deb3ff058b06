use rust_decimal::Decimal;

use crate::error::FormatError;

/// Raw amount of one displayed digit: 10^(decimals - precision)
pub fn display_unit(decimals: u32, precision: u32) -> Result<u128, FormatError> {
    10u128
        .checked_pow(decimals.saturating_sub(precision))
        .ok_or(FormatError::Decimals(decimals))
}

/// Render a raw fixed-point amount in token units, truncated (not rounded) to
/// `precision` fraction digits, trailing zeros removed.
pub fn format_units(value: u128, decimals: u32, precision: u32) -> Result<String, FormatError> {
    let precision = precision.min(decimals);
    let unit = display_unit(decimals, precision)?;
    let mantissa = i128::try_from(value / unit).map_err(|_| FormatError::OutOfRange(value))?;
    let amount = Decimal::try_from_i128_with_scale(mantissa, precision)
        .map_err(|_| FormatError::OutOfRange(value))?;
    Ok(amount.normalize().to_string())
}

/// Signed variant for flow rates
pub fn format_signed_units(value: i128, decimals: u32, precision: u32) -> Result<String, FormatError> {
    let shown = format_units(value.unsigned_abs(), decimals, precision)?;
    if value < 0 && shown != "0" {
        Ok(format!("-{shown}"))
    } else {
        Ok(shown)
    }
}
