//! Error types for pool math, parameter management and pool operations
//!
//! Every error aborts the whole operation; the pool restores its pre-call
//! state before returning any of these.

use primitive_types::U256;
use thiserror::Error;

/// Errors raised by fixed-point arithmetic and the invariant engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,

    /// Newton iteration for the invariant did not settle within the bound
    #[error("Invariant did not converge after {iterations} iterations")]
    InvariantDidNotConverge { iterations: usize },

    /// Newton iteration for a single token balance did not settle within the bound
    #[error("Token balance did not converge after {iterations} iterations")]
    BalanceDidNotConverge { iterations: usize },

    #[error("Value {value} does not fit the target representation")]
    OutOfRange { value: String },
}

/// Errors raised by the amplification parameter manager
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmplificationError {
    #[error("Amplification value {value} outside [{min}, {max}]")]
    OutOfBounds { value: u64, min: u64, max: u64 },

    #[error("Amplification ramp already in progress")]
    AlreadyRamping,

    #[error("No amplification ramp in progress")]
    NotRamping,

    #[error("Ramp duration {duration}s shorter than minimum {min}s")]
    RampTooShort { duration: u64, min: u64 },

    #[error("Ramp changes amplification faster than {max_daily_factor}x per day")]
    RampTooFast { max_daily_factor: u64 },
}

/// Failure reported by an external rate source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateSourceError {
    #[error("Rate source unavailable for token {token}: {reason}")]
    Unavailable { token: String, reason: String },

    #[error("Rate source returned zero rate for token {token}")]
    ZeroRate { token: String },
}

/// Top-level pool operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Amount vector length does not match the token registry
    #[error("Expected {expected} amounts, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("Token {0} is not registered with the pool")]
    UnknownToken(String),

    #[error("Token index {index} outside registry of {len} tokens")]
    TokenIndexOutOfBounds { index: usize, len: usize },

    #[error("Slippage limit violated: {limit_kind} limit {limit}, computed {actual}")]
    Slippage {
        limit_kind: &'static str,
        limit: U256,
        actual: U256,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Pool is not initialized")]
    Uninitialized,

    #[error("Pool is already initialized")]
    AlreadyInitialized,

    #[error("Initial share amount {actual} below minimum {minimum}")]
    MinimumShareNotMet { minimum: U256, actual: U256 },

    #[error("Recovery mode is not enabled")]
    RecoveryModeDisabled,

    #[error("Fee percentage {value} outside [{min}, {max}]")]
    InvalidFeePercentage { value: U256, min: U256, max: U256 },

    #[error("Invalid pool parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Amplification(#[from] AmplificationError),

    #[error(transparent)]
    RateSource(#[from] RateSourceError),
}

pub type Result<T> = std::result::Result<T, PoolError>;
