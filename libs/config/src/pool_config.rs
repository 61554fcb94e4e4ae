//! Pool Configuration Module
//!
//! Loads pool deployment parameters from a TOML file with environment
//! overrides. Percentages are decimal strings (`"0.001"` is 0.1%).

use crate::defaults;
use anyhow::{bail, ensure, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Complete pool configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PoolSettings {
    /// Pool-wide parameters
    pub pool: PoolSection,

    /// Priced tokens in registry order, share token excluded
    pub tokens: Vec<TokenSettings>,

    /// Protocol fee percentages
    #[serde(default)]
    pub protocol_fees: ProtocolFeeSettings,
}

/// Pool-wide parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PoolSection {
    #[serde(default = "default_share_token")]
    pub share_token: String,

    /// Position of the share token in the full registry
    #[serde(default = "default_share_index")]
    pub share_index: usize,

    /// Raw amplification of the balance-sum term
    pub amp1: u64,

    /// Raw amplification of the invariant term
    pub amp2: u64,

    #[serde(default = "default_swap_fee_percentage")]
    pub swap_fee_percentage: Decimal,
}

/// One priced token
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TokenSettings {
    pub id: String,

    #[serde(default = "default_decimals")]
    pub decimals: u8,

    /// Whether the token's value is reported by an external rate source
    #[serde(default)]
    pub rate_provider: bool,

    #[serde(default)]
    pub exempt_from_yield_fees: bool,

    /// Exponent in the yield rate product; equal weights when omitted
    pub yield_weight: Option<Decimal>,

    #[serde(default = "default_rate_cache_duration")]
    pub rate_cache_duration: u64,
}

/// Protocol fee percentages
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProtocolFeeSettings {
    #[serde(default = "default_protocol_swap_fee")]
    pub swap_fee_percentage: Decimal,

    #[serde(default = "default_protocol_yield_fee")]
    pub yield_fee_percentage: Decimal,
}

impl Default for ProtocolFeeSettings {
    fn default() -> Self {
        Self {
            swap_fee_percentage: default_protocol_swap_fee(),
            yield_fee_percentage: default_protocol_yield_fee(),
        }
    }
}

fn default_share_token() -> String {
    defaults::pool::SHARE_TOKEN.to_string()
}

fn default_share_index() -> usize {
    defaults::pool::SHARE_INDEX
}

fn default_swap_fee_percentage() -> Decimal {
    Decimal::from_str(defaults::pool::SWAP_FEE_PERCENTAGE).unwrap_or_default()
}

fn default_decimals() -> u8 {
    defaults::tokens::DECIMALS
}

fn default_rate_cache_duration() -> u64 {
    defaults::tokens::RATE_CACHE_DURATION_SECS
}

fn default_protocol_swap_fee() -> Decimal {
    Decimal::from_str(defaults::protocol_fees::SWAP_FEE_PERCENTAGE).unwrap_or_default()
}

fn default_protocol_yield_fee() -> Decimal {
    Decimal::from_str(defaults::protocol_fees::YIELD_FEE_PERCENTAGE).unwrap_or_default()
}

fn check_fraction(name: &str, value: Decimal) -> Result<()> {
    ensure!(
        value >= Decimal::ZERO && value <= Decimal::ONE,
        "{} must be within [0, 1], got {}",
        name,
        value
    );
    Ok(())
}

impl PoolSettings {
    /// Load configuration from a file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(defaults::CONFIG_PATH));
        info!("Loading pool config: {:?}", path);

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(defaults::ENV_PREFIX)
                    .separator(defaults::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate().context("Invalid pool configuration")?;
        debug!(tokens = settings.tokens.len(), "Pool config loaded");
        Ok(settings)
    }

    /// Parse configuration from a TOML string without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).context("Failed to parse pool TOML")?;
        settings.validate().context("Invalid pool configuration")?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize pool configuration")
    }

    /// Structural checks; numeric bounds are enforced when the pool is built
    pub fn validate(&self) -> Result<()> {
        if self.tokens.len() < 2 {
            bail!("At least 2 priced tokens required, got {}", self.tokens.len());
        }
        ensure!(
            self.pool.share_index <= self.tokens.len(),
            "share_index {} outside registry of {} tokens",
            self.pool.share_index,
            self.tokens.len() + 1
        );

        let mut seen = HashSet::new();
        seen.insert(self.pool.share_token.as_str());
        for token in &self.tokens {
            ensure!(
                seen.insert(token.id.as_str()),
                "Duplicate token id {}",
                token.id
            );
            ensure!(
                token.decimals <= 18,
                "Token {} has {} decimals, at most 18 supported",
                token.id,
                token.decimals
            );
            if let Some(weight) = token.yield_weight {
                ensure!(
                    weight >= Decimal::ZERO,
                    "Token {} has negative yield weight",
                    token.id
                );
            }
        }

        check_fraction("pool.swap_fee_percentage", self.pool.swap_fee_percentage)?;
        check_fraction(
            "protocol_fees.swap_fee_percentage",
            self.protocol_fees.swap_fee_percentage,
        )?;
        check_fraction(
            "protocol_fees.yield_fee_percentage",
            self.protocol_fees.yield_fee_percentage,
        )?;
        Ok(())
    }
}

/// Convenience function to load configuration from the default location
pub fn load_settings() -> Result<PoolSettings> {
    PoolSettings::load(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;
    use tempfile::tempdir;

    const POOL_TOML: &str = r#"
[pool]
share_token = "bb-USD"
share_index = 1
amp1 = 200
amp2 = 100
swap_fee_percentage = "0.001"

[[tokens]]
id = "USDC"
decimals = 6

[[tokens]]
id = "sDAI"
rate_provider = true
yield_weight = "1.0"
rate_cache_duration = 600

[protocol_fees]
swap_fee_percentage = "0.5"
yield_fee_percentage = "0.5"
"#;

    #[test]
    fn test_load_pool_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("pool.toml");
        fs::write(&config_path, POOL_TOML).unwrap();

        let settings = PoolSettings::load(Some(&config_path)).unwrap();

        assert_eq!(settings.pool.share_token, "bb-USD");
        assert_eq!(settings.pool.share_index, 1);
        assert_eq!(settings.pool.amp1, 200);
        assert_eq!(settings.pool.swap_fee_percentage, dec!(0.001));
        assert_eq!(settings.tokens.len(), 2);

        let usdc = &settings.tokens[0];
        assert_eq!(usdc.decimals, 6);
        assert!(!usdc.rate_provider);
        assert_eq!(usdc.yield_weight, None);
        assert_eq!(
            usdc.rate_cache_duration,
            defaults::tokens::RATE_CACHE_DURATION_SECS
        );

        let sdai = &settings.tokens[1];
        assert_eq!(sdai.decimals, 18);
        assert!(sdai.rate_provider);
        assert_eq!(sdai.yield_weight, Some(dec!(1.0)));
        assert_eq!(sdai.rate_cache_duration, 600);

        assert_eq!(settings.protocol_fees.yield_fee_percentage, dec!(0.5));
    }

    #[test]
    fn test_defaults_applied() {
        let settings = PoolSettings::from_toml_str(
            r#"
[pool]
amp1 = 100
amp2 = 100

[[tokens]]
id = "A"

[[tokens]]
id = "B"
"#,
        )
        .unwrap();

        assert_eq!(settings.pool.share_token, defaults::pool::SHARE_TOKEN);
        assert_eq!(settings.pool.share_index, defaults::pool::SHARE_INDEX);
        assert_eq!(settings.pool.swap_fee_percentage, dec!(0.0004));
        assert_eq!(settings.protocol_fees.swap_fee_percentage, Decimal::ZERO);
    }

    #[test]
    fn test_environment_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("pool.toml");
        fs::write(&config_path, POOL_TOML).unwrap();

        std::env::set_var("STABLEPOOL__POOL__AMP2", "150");
        let settings = PoolSettings::load(Some(&config_path));
        std::env::remove_var("STABLEPOOL__POOL__AMP2");

        assert_eq!(settings.unwrap().pool.amp2, 150);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        settings.tokens[1].id = "bb-USD".to_string();
        assert!(settings.validate().is_err());

        let mut settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        settings.protocol_fees.yield_fee_percentage = dec!(1.5);
        assert!(settings.validate().is_err());

        let mut settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        settings.tokens.truncate(1);
        assert!(settings.validate().is_err());

        assert!(PoolSettings::load(Some(Path::new("/nonexistent/pool.toml"))).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = PoolSettings::from_toml_str(POOL_TOML).unwrap();
        let rendered = settings.to_toml().unwrap();
        assert_eq!(PoolSettings::from_toml_str(&rendered).unwrap(), settings);
    }
}
