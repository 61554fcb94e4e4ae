//! Amplification parameter management
//!
//! Each of the two curve coefficients is either fixed or moving linearly
//! between two values across a time window. Values are stored with
//! [`AMP_PRECISION`](crate::stable_math::AMP_PRECISION) applied; governance
//! speaks in raw values.

use crate::errors::AmplificationError;
use crate::pool_traits::AmplificationSource;
use crate::stable_math::AMP_PRECISION;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Smallest raw amplification value
pub const MIN_AMP: u64 = 1;

/// Largest raw amplification value
pub const MAX_AMP: u64 = 5000;

/// Shortest allowed ramp window in seconds
pub const MIN_UPDATE_TIME: u64 = 86_400;

/// Largest allowed change factor per day
pub const MAX_AMP_UPDATE_DAILY_RATE: u64 = 2;

/// Which side of the curve a coefficient amplifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmplificationCoefficient {
    /// `amp1`, multiplying the balance sum; raising it alone steepens the curve
    Sum,
    /// `amp2`, multiplying the invariant term; raising it alone flattens the curve
    Product,
}

/// Linear ramp of one coefficient; a fixed value is a ramp whose window has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmplificationRamp {
    pub start_value: U256,
    pub end_value: U256,
    pub start_time: u64,
    pub end_time: u64,
}

impl AmplificationRamp {
    pub fn fixed(value: U256) -> Self {
        Self {
            start_value: value,
            end_value: value,
            start_time: 0,
            end_time: 0,
        }
    }

    /// Interpolated value at `now` and whether the ramp is still running
    pub fn value_at(&self, now: u64) -> (U256, bool) {
        if now >= self.end_time {
            return (self.end_value, false);
        }

        let elapsed = U256::from(now.saturating_sub(self.start_time));
        let window = U256::from(self.end_time - self.start_time);
        let value = if self.end_value > self.start_value {
            self.start_value + (self.end_value - self.start_value) * elapsed / window
        } else {
            self.start_value - (self.start_value - self.end_value) * elapsed / window
        };

        (value, true)
    }
}

fn check_bounds(raw: u64) -> Result<U256, AmplificationError> {
    if !(MIN_AMP..=MAX_AMP).contains(&raw) {
        return Err(AmplificationError::OutOfBounds {
            value: raw,
            min: MIN_AMP,
            max: MAX_AMP,
        });
    }
    Ok(U256::from(raw) * AMP_PRECISION)
}

/// Owns both coefficient ramps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmplificationManager {
    sum: AmplificationRamp,
    product: AmplificationRamp,
}

impl AmplificationManager {
    /// Create with fixed raw values for `amp1` and `amp2`
    pub fn new(amp1: u64, amp2: u64) -> Result<Self, AmplificationError> {
        Ok(Self {
            sum: AmplificationRamp::fixed(check_bounds(amp1)?),
            product: AmplificationRamp::fixed(check_bounds(amp2)?),
        })
    }

    pub fn ramp(&self, coefficient: AmplificationCoefficient) -> &AmplificationRamp {
        match coefficient {
            AmplificationCoefficient::Sum => &self.sum,
            AmplificationCoefficient::Product => &self.product,
        }
    }

    fn ramp_mut(&mut self, coefficient: AmplificationCoefficient) -> &mut AmplificationRamp {
        match coefficient {
            AmplificationCoefficient::Sum => &mut self.sum,
            AmplificationCoefficient::Product => &mut self.product,
        }
    }
}

impl AmplificationSource for AmplificationManager {
    fn current_value(&self, coefficient: AmplificationCoefficient, now: u64) -> (U256, bool) {
        self.ramp(coefficient).value_at(now)
    }

    fn start_update(
        &mut self,
        coefficient: AmplificationCoefficient,
        raw_end_value: u64,
        end_time: u64,
        now: u64,
    ) -> Result<(), AmplificationError> {
        let end_value = check_bounds(raw_end_value)?;

        let (current, ramping) = self.current_value(coefficient, now);
        if ramping {
            return Err(AmplificationError::AlreadyRamping);
        }

        let duration = end_time.saturating_sub(now);
        if duration < MIN_UPDATE_TIME {
            return Err(AmplificationError::RampTooShort {
                duration,
                min: MIN_UPDATE_TIME,
            });
        }

        // Daily factor = (larger / smaller) * 1 day / duration, rounded up
        let (larger, smaller) = if end_value > current {
            (end_value, current)
        } else {
            (current, end_value)
        };
        let numerator = larger * U256::from(MIN_UPDATE_TIME);
        let denominator = smaller * U256::from(duration);
        let daily_rate = (numerator + denominator - U256::one()) / denominator;
        if daily_rate > U256::from(MAX_AMP_UPDATE_DAILY_RATE) {
            return Err(AmplificationError::RampTooFast {
                max_daily_factor: MAX_AMP_UPDATE_DAILY_RATE,
            });
        }

        *self.ramp_mut(coefficient) = AmplificationRamp {
            start_value: current,
            end_value,
            start_time: now,
            end_time,
        };

        info!(
            ?coefficient,
            start = %(current / AMP_PRECISION),
            end = raw_end_value,
            end_time,
            "Amplification ramp started"
        );
        Ok(())
    }

    fn stop_update(
        &mut self,
        coefficient: AmplificationCoefficient,
        now: u64,
    ) -> Result<(), AmplificationError> {
        let (current, ramping) = self.current_value(coefficient, now);
        if !ramping {
            return Err(AmplificationError::NotRamping);
        }

        *self.ramp_mut(coefficient) = AmplificationRamp {
            start_value: current,
            end_value: current,
            start_time: now,
            end_time: now,
        };

        info!(?coefficient, value = %current, "Amplification ramp stopped");
        Ok(())
    }
}
