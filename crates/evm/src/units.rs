use alloy_primitives::U256;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("amount {amount} has more than {decimals} decimal places")]
    ExcessPrecision { amount: Decimal, decimals: u32 },
    #[error("amount {0} is negative")]
    Negative(Decimal),
    #[error("amount does not fit: {0}")]
    Overflow(String),
}

/// Token amount to integer base units, refusing to round.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256, UnitError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(UnitError::Negative(amount));
    }
    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(UnitError::ExcessPrecision { amount, decimals });
    }
    let factor = 10u128
        .checked_pow(decimals - normalized.scale())
        .ok_or_else(|| UnitError::Overflow(format!("10^{decimals}")))?;
    let mantissa = u128::try_from(normalized.mantissa())
        .map_err(|error| UnitError::Overflow(error.to_string()))?;
    let base = mantissa
        .checked_mul(factor)
        .ok_or_else(|| UnitError::Overflow(format!("{amount} at {decimals} decimals")))?;
    Ok(U256::from(base))
}

pub fn from_base_units(value: U256, decimals: u32) -> Result<Decimal, UnitError> {
    let raw = i128::try_from(value).map_err(|error| UnitError::Overflow(error.to_string()))?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .map(|amount| amount.normalize())
        .map_err(|error| UnitError::Overflow(error.to_string()))
}
