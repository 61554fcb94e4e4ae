//! # Composable Stable Pool - Dual-Amplification AMM Core
//!
//! ## Purpose
//!
//! Pricing and accounting core of a liquidity pool holding several pegged or
//! rate-bearing tokens plus its own share token. Prices come from a
//! stable-swap invariant with two independent amplification coefficients;
//! protocol fees are charged on invariant growth between liquidity-changing
//! operations and on yield accrued by rate-bearing tokens, never twice and
//! never on proportional joins or exits.
//!
//! ## Integration Points
//!
//! - **Input Sources**: ledger balances and logical time per call ([`LedgerSnapshot`]),
//!   token rates ([`RateSource`]), protocol fee percentages ([`ProtocolFeeProvider`])
//! - **Output Destinations**: operation outcomes telling the host ledger what to
//!   move, mint and burn, including the protocol's fee shares
//! - **Governance**: amplification ramps, swap fee, rate cache durations and
//!   recovery mode, each gated by an [`Authorization`]
//! - **Precision**: 18-decimal fixed point on 256-bit integers, rounding in the pool's favor
//!
//! ## Architecture Role
//!
//! ```text
//! FixedPoint ─▶ StableMath ─┬─▶ ProtocolFeeAccountant ─┐
//! AmplificationManager ─────┤                          ├─▶ ComposableStablePool
//! RateCache ────────────────┴──────────────────────────┘
//! ```
//!
//! Each operation runs refresh → settle → execute → rebaseline on a
//! checkpoint of the pool state and commits only if every phase succeeds.

pub mod amplification;
pub mod errors;
pub mod fixed_point;
pub mod operations;
pub mod params;
pub mod pool;
pub mod pool_traits;
pub mod protocol_fees;
pub mod rate_cache;
pub mod registry;
pub mod stable_math;

pub use amplification::{
    AmplificationCoefficient, AmplificationManager, AmplificationRamp, MAX_AMP, MIN_AMP,
};
pub use errors::{AmplificationError, MathError, PoolError, RateSourceError, Result};
pub use fixed_point::{FixedPoint, ONE};
pub use operations::{
    ExitKind, ExitOutcome, ExitRequest, InitializeOutcome, JoinKind, JoinOutcome, JoinRequest,
    LedgerSnapshot, SwapKind, SwapOutcome, SwapRequest,
};
pub use params::{PoolParams, MAX_SWAP_FEE_PERCENTAGE, MIN_SWAP_FEE_PERCENTAGE};
pub use pool::{
    AmplificationParameters, ComposableStablePool, ShareSupply, MINIMUM_SHARE, PREMINTED_SUPPLY,
};
pub use pool_traits::{
    AmplificationSource, Authorization, FeeAccountant, FixedProtocolFees, ProtocolFeeProvider,
    RateSource,
};
pub use protocol_fees::{FeeBaseline, ProtocolFeeAccountant};
pub use rate_cache::{RateCache, TokenRateCache};
pub use registry::{PricedToken, TokenId, TokenRegistry};
pub use stable_math::{StableMath, AMP_PRECISION};

/// Common types for pool configuration and amounts
pub use primitive_types::U256;
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
