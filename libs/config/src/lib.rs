//! # Stable Pool Configuration
//!
//! Deployment parameters for a composable stable pool: the token registry,
//! amplification coefficients, fee percentages and rate cache durations.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pool_config::PoolSettings;
//! use std::path::Path;
//!
//! let settings = PoolSettings::load(Some(Path::new("config/pool.toml"))).unwrap();
//! println!("{} priced tokens", settings.tokens.len());
//! ```
//!
//! Values can be overridden from the environment with the `STABLEPOOL`
//! prefix and `__` as the nesting separator, e.g. `STABLEPOOL__POOL__AMP1=200`.

pub mod defaults;
pub mod pool_config;

// Re-export commonly used types
pub use pool_config::{
    load_settings, PoolSection, PoolSettings, ProtocolFeeSettings, TokenSettings,
};
