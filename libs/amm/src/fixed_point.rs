//! 18-decimal fixed-point arithmetic on 256-bit integers
//!
//! Every multiply and divide comes in an explicit rounding direction. Callers
//! pick the direction that never favors the user over the pool: amounts paid
//! out round down, amounts taken in round up.
//!
//! `Decimal` is only used at the boundary (configuration values and the
//! fractional powers in the rate product); all pool math stays in `U256`.

use crate::errors::MathError;
use primitive_types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

/// 1.0 in 18-decimal fixed point
pub const ONE: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Number of decimals carried by every fixed-point value
pub const DECIMALS: u32 = 18;

type MathResult<T> = Result<T, MathError>;

/// Fixed-point helpers with explicit rounding
pub struct FixedPoint;

impl FixedPoint {
    pub fn add(a: U256, b: U256) -> MathResult<U256> {
        a.checked_add(b).ok_or(MathError::Overflow)
    }

    pub fn sub(a: U256, b: U256) -> MathResult<U256> {
        a.checked_sub(b).ok_or(MathError::Underflow)
    }

    /// Plain integer multiplication, no rescaling
    pub fn mul(a: U256, b: U256) -> MathResult<U256> {
        a.checked_mul(b).ok_or(MathError::Overflow)
    }

    /// Plain integer division rounding down
    pub fn div_raw_down(a: U256, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        Ok(a / b)
    }

    /// Plain integer division rounding up
    pub fn div_raw_up(a: U256, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        if a.is_zero() {
            return Ok(U256::zero());
        }
        Ok((a - U256::one()) / b + U256::one())
    }

    pub fn mul_down(a: U256, b: U256) -> MathResult<U256> {
        Ok(Self::mul(a, b)? / ONE)
    }

    pub fn mul_up(a: U256, b: U256) -> MathResult<U256> {
        let product = Self::mul(a, b)?;
        if product.is_zero() {
            return Ok(U256::zero());
        }
        Ok((product - U256::one()) / ONE + U256::one())
    }

    pub fn div_down(a: U256, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        Ok(Self::mul(a, ONE)? / b)
    }

    pub fn div_up(a: U256, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        if a.is_zero() {
            return Ok(U256::zero());
        }
        Ok((Self::mul(a, ONE)? - U256::one()) / b + U256::one())
    }

    /// `1 - x`, clamped at zero
    pub fn complement(x: U256) -> U256 {
        if x < ONE {
            ONE - x
        } else {
            U256::zero()
        }
    }

    /// `base ^ exponent` rounded down, both in fixed point
    ///
    /// Exponents of exactly zero and one short-circuit so the common
    /// single-weight case stays exact.
    pub fn pow_down(base: U256, exponent: U256) -> MathResult<U256> {
        if exponent.is_zero() {
            return Ok(ONE);
        }
        if exponent == ONE {
            return Ok(base);
        }
        if base.is_zero() {
            return Ok(U256::zero());
        }

        let base = Self::to_decimal(base)?;
        let exponent = Self::to_decimal(exponent)?;
        let result = base
            .checked_powd(exponent)
            .ok_or(MathError::Overflow)?
            .round_dp_with_strategy(DECIMALS, RoundingStrategy::ToZero);

        Self::from_decimal(result)
    }

    /// Convert a non-negative `Decimal` to fixed point, truncating extra digits
    pub fn from_decimal(value: Decimal) -> MathResult<U256> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MathError::OutOfRange {
                value: value.to_string(),
            });
        }

        let mantissa = value.mantissa().unsigned_abs();
        let scale = value.scale();
        if scale <= DECIMALS {
            Self::mul(U256::from(mantissa), U256::exp10((DECIMALS - scale) as usize))
        } else {
            Ok(U256::from(mantissa) / U256::exp10((scale - DECIMALS) as usize))
        }
    }

    /// Convert fixed point to `Decimal`; fails above the 96-bit mantissa range
    pub fn to_decimal(value: U256) -> MathResult<Decimal> {
        let out_of_range = || MathError::OutOfRange {
            value: value.to_string(),
        };
        if value.bits() > 127 {
            return Err(out_of_range());
        }
        Decimal::try_from_i128_with_scale(value.low_u128() as i128, DECIMALS)
            .map(|d| d.normalize())
            .map_err(|_| out_of_range())
    }

    /// Lossy conversion for logging only
    pub fn to_f64(value: U256) -> f64 {
        Self::to_decimal(value)
            .ok()
            .and_then(|d| d.to_f64())
            .unwrap_or(f64::NAN)
    }
}
