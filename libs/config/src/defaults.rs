//! Pool configuration defaults
//!
//! Values used when a setting is omitted from the configuration file.

/// Default configuration file location
pub const CONFIG_PATH: &str = "config/pool.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "STABLEPOOL";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Pool defaults
pub mod pool {
    /// Registry index of the share token
    pub const SHARE_INDEX: usize = 0;

    /// Share token identifier
    pub const SHARE_TOKEN: &str = "SPT";

    /// Swap fee percentage (0.04%)
    pub const SWAP_FEE_PERCENTAGE: &str = "0.0004";
}

/// Token defaults
pub mod tokens {
    /// Decimals assumed when omitted
    pub const DECIMALS: u8 = 18;

    /// Rate cache duration in seconds
    pub const RATE_CACHE_DURATION_SECS: u64 = 3_600;
}

/// Protocol fee defaults
pub mod protocol_fees {
    /// Share of swap-fee growth owed to the protocol
    pub const SWAP_FEE_PERCENTAGE: &str = "0";

    /// Share of yield growth owed to the protocol
    pub const YIELD_FEE_PERCENTAGE: &str = "0";
}
