//! Capability traits the pool is composed from
//!
//! The orchestrator never talks to an oracle, governance or a fee ledger
//! directly; it goes through these seams so hosts and tests can supply their
//! own implementations.

use crate::amplification::AmplificationCoefficient;
use crate::errors::{AmplificationError, MathError, RateSourceError};
use crate::protocol_fees::{FeeBaseline, FeeInputs, Settlement};
use crate::registry::TokenId;
use primitive_types::U256;

/// External exchange rate of a rate-bearing token, 18-decimal fixed point
pub trait RateSource: Send + Sync {
    fn fetch_rate(&self, token: &TokenId) -> Result<U256, RateSourceError>;
}

/// Protocol fee percentages owed on swap-fee growth and yield growth
pub trait ProtocolFeeProvider: Send + Sync {
    fn swap_fee_percentage(&self) -> U256;

    fn yield_fee_percentage(&self) -> U256;
}

/// Current amplification and its governance controls
pub trait AmplificationSource {
    /// Value with amplification precision applied, and whether it is ramping
    fn current_value(&self, coefficient: AmplificationCoefficient, now: u64) -> (U256, bool);

    fn start_update(
        &mut self,
        coefficient: AmplificationCoefficient,
        raw_end_value: u64,
        end_time: u64,
        now: u64,
    ) -> Result<(), AmplificationError>;

    fn stop_update(
        &mut self,
        coefficient: AmplificationCoefficient,
        now: u64,
    ) -> Result<(), AmplificationError>;

    /// `(amp1, amp2)` at `now`
    fn amplification(&self, now: u64) -> (U256, U256) {
        (
            self.current_value(AmplificationCoefficient::Sum, now).0,
            self.current_value(AmplificationCoefficient::Product, now).0,
        )
    }
}

/// Protocol fee state machine: settle growth since the last baseline, then rebaseline
pub trait FeeAccountant {
    /// Fees owed right now without touching any state
    fn pending(&self, inputs: &FeeInputs<'_>) -> Result<Settlement, MathError>;

    /// Fees owed right now; advances the yield watermark
    fn settle(&mut self, inputs: &FeeInputs<'_>) -> Result<Settlement, MathError>;

    /// Record the post-operation invariant, balances and rates; returns the invariant
    fn rebaseline(&mut self, inputs: &FeeInputs<'_>) -> Result<U256, MathError>;

    /// Shrink the baseline by `numerator / denominator` after a proportional withdrawal
    fn scale_baseline(&mut self, numerator: U256, denominator: U256) -> Result<(), MathError>;

    fn baseline(&self) -> Option<&FeeBaseline>;

    fn yield_watermark(&self) -> U256;
}

/// Protocol fee percentages that never change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedProtocolFees {
    pub swap: U256,
    pub yield_fee: U256,
}

impl FixedProtocolFees {
    pub fn new(swap: U256, yield_fee: U256) -> Self {
        Self { swap, yield_fee }
    }
}

impl ProtocolFeeProvider for FixedProtocolFees {
    fn swap_fee_percentage(&self) -> U256 {
        self.swap
    }

    fn yield_fee_percentage(&self) -> U256 {
        self.yield_fee
    }
}

/// Proof that the caller may change pool parameters
///
/// The pool does not decide who is allowed; the host's governance layer
/// issues this value and the parameter-change entry points require it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    grantee: String,
}

impl Authorization {
    pub fn new(grantee: impl Into<String>) -> Self {
        Self {
            grantee: grantee.into(),
        }
    }

    pub fn grantee(&self) -> &str {
        &self.grantee
    }
}
