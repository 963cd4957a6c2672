//! Fiat to native-unit conversion.
//!
//! Rates are expressed as fiat units per one native unit (e.g. VND per ETH).
//! Native amounts are kept at [`NATIVE_DECIMALS`] fractional digits, the
//! ledger's smallest indivisible unit (1 wei = 10^-18 ETH), rounded half to
//! even. Converting a native amount to base units is exact.
//!
//! The quotient is computed exactly in base units with 256-bit integers and
//! rounded once. `rust_decimal` holds 96-bit mantissas, so native amounts
//! above roughly 7.9e10 units fail with [`RateError::Overflow`] instead of
//! losing base units.

use alloy::primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Fractional digits of the native unit.
pub const NATIVE_DECIMALS: u32 = 18;

/// Fractional digits kept when converting back to fiat for display.
pub const FIAT_DECIMALS: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("exchange rate must be positive, got {0}")]
    InvalidRate(Decimal),

    #[error("amount must not be negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("amount {0} does not fit the native unit range")]
    Overflow(Decimal),
}

/// A validated, strictly positive exchange rate (fiat per native unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeRate(Decimal);

impl ExchangeRate {
    pub fn new(fiat_per_native: Decimal) -> Result<Self, RateError> {
        if fiat_per_native <= Decimal::ZERO {
            return Err(RateError::InvalidRate(fiat_per_native));
        }
        Ok(Self(fiat_per_native))
    }

    pub fn fiat_per_native(self) -> Decimal {
        self.0
    }

    /// Convert a fiat amount to native units.
    pub fn to_native(self, fiat_amount: Decimal) -> Result<Decimal, RateError> {
        if fiat_amount.is_sign_negative() && !fiat_amount.is_zero() {
            return Err(RateError::NegativeAmount(fiat_amount));
        }
        from_base_units(self.to_native_base_units(fiat_amount)?)
    }

    /// Convert a fiat amount to native base units (wei), rounded half to even.
    pub fn to_native_base_units(self, fiat_amount: Decimal) -> Result<u128, RateError> {
        if fiat_amount.is_sign_negative() && !fiat_amount.is_zero() {
            return Err(RateError::NegativeAmount(fiat_amount));
        }
        let overflow = || RateError::Overflow(fiat_amount);
        let ten = U256::from(10u8);
        // fiat_mantissa * 10^(rate_scale + 18) / (rate_mantissa * 10^fiat_scale)
        let numerator = U256::from(fiat_amount.mantissa().unsigned_abs())
            .checked_mul(ten.pow(U256::from(self.0.scale() + NATIVE_DECIMALS)))
            .ok_or_else(overflow)?;
        let denominator = U256::from(self.0.mantissa().unsigned_abs())
            .checked_mul(ten.pow(U256::from(fiat_amount.scale())))
            .ok_or_else(overflow)?;
        let (quotient, remainder) = numerator.div_rem(denominator);
        let twice = remainder + remainder;
        let round_up = twice > denominator || (twice == denominator && quotient.bit(0));
        let base_units = if round_up {
            quotient + U256::from(1u8)
        } else {
            quotient
        };
        u128::try_from(base_units).map_err(|_| overflow())
    }

    /// Convert a native amount back to fiat, for display only.
    pub fn to_fiat(self, native_amount: Decimal) -> Result<Decimal, RateError> {
        if native_amount.is_sign_negative() && !native_amount.is_zero() {
            return Err(RateError::NegativeAmount(native_amount));
        }
        let product = native_amount
            .checked_mul(self.0)
            .ok_or(RateError::Overflow(native_amount))?;
        Ok(product.round_dp_with_strategy(FIAT_DECIMALS, RoundingStrategy::MidpointNearestEven))
    }
}

impl std::fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `nativeAmount = fiatAmount / rate`, rounded to the native unit.
pub fn to_native(fiat_amount: Decimal, rate: Decimal) -> Result<Decimal, RateError> {
    ExchangeRate::new(rate)?.to_native(fiat_amount)
}

/// Convert a native amount into integer base units (wei).
pub fn to_base_units(native_amount: Decimal) -> Result<u128, RateError> {
    if native_amount.is_sign_negative() && !native_amount.is_zero() {
        return Err(RateError::NegativeAmount(native_amount));
    }
    let native = native_amount.normalize();
    let scale = native.scale();
    if scale > NATIVE_DECIMALS {
        return Err(RateError::Overflow(native_amount));
    }
    let mantissa =
        u128::try_from(native.mantissa()).map_err(|_| RateError::Overflow(native_amount))?;
    10u128
        .checked_pow(NATIVE_DECIMALS - scale)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or(RateError::Overflow(native_amount))
}

/// Convert integer base units (wei) into a native amount.
pub fn from_base_units(base_units: u128) -> Result<Decimal, RateError> {
    let value = i128::try_from(base_units).map_err(|_| RateError::Overflow(Decimal::MAX))?;
    Decimal::try_from_i128_with_scale(value, NATIVE_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|_| RateError::Overflow(Decimal::MAX))
}
