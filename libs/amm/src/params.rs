//! Pool construction parameters
//!
//! Built directly or converted from [`pool_config::PoolSettings`].

use crate::amplification::{MAX_AMP, MIN_AMP};
use crate::errors::{PoolError, Result};
use crate::fixed_point::FixedPoint;
use crate::pool_traits::FixedProtocolFees;
use crate::registry::{PricedToken, TokenId, TokenRegistry};
use pool_config::{PoolSettings, ProtocolFeeSettings};
use primitive_types::U256;
use rust_decimal::Decimal;

/// Smallest swap fee percentage (0.0001%)
pub const MIN_SWAP_FEE_PERCENTAGE: U256 = U256([1_000_000_000_000, 0, 0, 0]);

/// Largest swap fee percentage (10%)
pub const MAX_SWAP_FEE_PERCENTAGE: U256 = U256([100_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParams {
    pub registry: TokenRegistry,
    /// Raw amplification of the balance-sum term
    pub amp1: u64,
    /// Raw amplification of the invariant term
    pub amp2: u64,
    pub swap_fee_percentage: U256,
    /// Rate cache duration per priced token, ignored for tokens without a provider
    pub rate_cache_durations: Vec<u64>,
}

pub fn check_swap_fee_percentage(value: U256) -> Result<()> {
    if value < MIN_SWAP_FEE_PERCENTAGE || value > MAX_SWAP_FEE_PERCENTAGE {
        return Err(PoolError::InvalidFeePercentage {
            value,
            min: MIN_SWAP_FEE_PERCENTAGE,
            max: MAX_SWAP_FEE_PERCENTAGE,
        });
    }
    Ok(())
}

fn fixed(value: Decimal) -> Result<U256> {
    Ok(FixedPoint::from_decimal(value)?)
}

impl PoolParams {
    pub fn validate(&self) -> Result<()> {
        for amp in [self.amp1, self.amp2] {
            if !(MIN_AMP..=MAX_AMP).contains(&amp) {
                return Err(PoolError::InvalidParameters(format!(
                    "amplification {} outside [{}, {}]",
                    amp, MIN_AMP, MAX_AMP
                )));
            }
        }
        check_swap_fee_percentage(self.swap_fee_percentage)?;
        if self.rate_cache_durations.len() != self.registry.priced_len() {
            return Err(PoolError::InputShape {
                expected: self.registry.priced_len(),
                actual: self.rate_cache_durations.len(),
            });
        }
        Ok(())
    }

    pub fn from_settings(settings: &PoolSettings) -> Result<Self> {
        let tokens = settings
            .tokens
            .iter()
            .map(|token| {
                let mut priced = PricedToken::new(token.id.clone(), token.decimals);
                priced.has_rate_provider = token.rate_provider;
                priced.exempt_from_yield_fees = token.exempt_from_yield_fees;
                priced.yield_weight = token.yield_weight.map(fixed).transpose()?;
                Ok(priced)
            })
            .collect::<Result<Vec<_>>>()?;

        let registry = TokenRegistry::new(
            TokenId::new(settings.pool.share_token.clone()),
            settings.pool.share_index,
            tokens,
        )?;

        let params = Self {
            registry,
            amp1: settings.pool.amp1,
            amp2: settings.pool.amp2,
            swap_fee_percentage: fixed(settings.pool.swap_fee_percentage)?,
            rate_cache_durations: settings
                .tokens
                .iter()
                .map(|token| token.rate_cache_duration)
                .collect(),
        };
        params.validate()?;
        Ok(params)
    }
}

impl FixedProtocolFees {
    pub fn from_settings(settings: &ProtocolFeeSettings) -> Result<Self> {
        Ok(Self::new(
            fixed(settings.swap_fee_percentage)?,
            fixed(settings.yield_fee_percentage)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::ONE;

    const POOL_TOML: &str = r#"
[pool]
share_token = "bb-USD"
share_index = 2
amp1 = 120
amp2 = 80
swap_fee_percentage = "0.0004"

[[tokens]]
id = "USDC"
decimals = 6

[[tokens]]
id = "sDAI"
rate_provider = true
yield_weight = "1"

[protocol_fees]
swap_fee_percentage = "0.5"
yield_fee_percentage = "0.25"
"#;

    #[test]
    fn test_from_settings() {
        let settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        let params = PoolParams::from_settings(&settings).unwrap();

        assert_eq!(params.amp1, 120);
        assert_eq!(params.amp2, 80);
        assert_eq!(params.swap_fee_percentage, U256::from(400_000_000_000_000u64));
        assert_eq!(params.registry.share_index(), 2);
        assert_eq!(params.registry.priced_len(), 2);
        assert_eq!(params.rate_cache_durations, vec![3_600, 3_600]);

        let sdai = &params.registry.priced_tokens()[1];
        assert!(sdai.pays_yield_fees());
        assert_eq!(sdai.yield_weight, Some(ONE));

        let fees = FixedProtocolFees::from_settings(&settings.protocol_fees).unwrap();
        assert_eq!(fees.swap, ONE / U256::from(2u8));
        assert_eq!(fees.yield_fee, ONE / U256::from(4u8));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        settings.pool.amp1 = 0;
        assert!(PoolParams::from_settings(&settings).is_err());

        let mut settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        settings.pool.swap_fee_percentage = Decimal::new(2, 1);
        assert!(matches!(
            PoolParams::from_settings(&settings),
            Err(PoolError::InvalidFeePercentage { .. })
        ));
    }
}
