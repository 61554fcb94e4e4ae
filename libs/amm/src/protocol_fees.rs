//! Protocol fee accounting
//!
//! Two kinds of value growth are owed to the protocol:
//!
//! - **swap-fee growth**: the invariant rising between operations because
//!   swap fees stay in the pool. Measured on current balances valued at the
//!   rates stored with the baseline, so rate movements never count here.
//! - **yield growth**: the weighted product of the rates of yield-paying
//!   tokens rising above its all-time high.
//!
//! Fees are paid by minting new share tokens, so a fee of `f` (as a fraction
//! of pool value) on supply `s` is charged as `s · f` shares.

use crate::errors::MathError;
use crate::fixed_point::{FixedPoint, ONE};
use crate::pool_traits::FeeAccountant;
use crate::registry::PricedToken;
use crate::stable_math::StableMath;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

type MathResult<T> = Result<T, MathError>;

/// Pool state right after the last fee settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBaseline {
    pub amp1: U256,
    pub amp2: U256,
    pub invariant: U256,
    /// Upscaled balances the invariant was computed from
    pub balances: Vec<U256>,
    /// Rates the balances were upscaled with
    pub rates: Vec<U256>,
}

/// Protocol fee percentages in effect for one settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolFeePercentages {
    pub swap: U256,
    pub yield_fee: U256,
}

/// Everything the accountant needs to value the pool
#[derive(Debug, Clone, Copy)]
pub struct FeeInputs<'a> {
    pub tokens: &'a [PricedToken],
    /// Raw balances in priced-token order
    pub raw_balances: &'a [U256],
    /// Current cached rates in priced-token order
    pub rates: &'a [U256],
    pub amp1: U256,
    pub amp2: U256,
    /// Share supply the fees are a fraction of
    pub supply: U256,
    pub percentages: ProtocolFeePercentages,
}

/// Share amounts owed to the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settlement {
    pub swap_fee_shares: U256,
    pub yield_fee_shares: U256,
    /// Watermark to store once the settlement is committed
    pub(crate) next_watermark: Option<U256>,
}

impl Settlement {
    pub fn total(&self) -> MathResult<U256> {
        FixedPoint::add(self.swap_fee_shares, self.yield_fee_shares)
    }
}

/// `supply · percentage · (1 − before/after)`, zero when nothing grew
fn growth_fee(supply: U256, percentage: U256, before: U256, after: U256) -> MathResult<U256> {
    if percentage.is_zero() || after <= before {
        return Ok(U256::zero());
    }
    let retained = FixedPoint::div_up(before, after)?;
    FixedPoint::mul_down(
        FixedPoint::mul_down(supply, percentage)?,
        FixedPoint::complement(retained),
    )
}

/// Protocol fee on the growth produced by a single operation
///
/// `invariant_before` is scaled by the change in supply to give the
/// invariant a fee-free operation would have produced; anything above that
/// is fee growth.
pub fn operation_fee(
    invariant_before: U256,
    invariant_after: U256,
    supply_before: U256,
    supply_after: U256,
    percentage: U256,
) -> MathResult<U256> {
    if percentage.is_zero() || supply_before.is_zero() || supply_after.is_zero() {
        return Ok(U256::zero());
    }
    let neutral_invariant = FixedPoint::div_raw_up(
        FixedPoint::mul(invariant_before, supply_after)?,
        supply_before,
    )?;
    growth_fee(supply_after, percentage, neutral_invariant, invariant_after)
}

/// `Π rateᵢ^wᵢ` over yield-paying tokens; `None` when there are none
pub fn rate_product(tokens: &[PricedToken], rates: &[U256]) -> MathResult<Option<U256>> {
    let mut product = None;
    for (token, rate) in tokens.iter().zip(rates) {
        if !token.pays_yield_fees() {
            continue;
        }
        let weight = token.yield_weight.unwrap_or(ONE);
        let factor = FixedPoint::pow_down(*rate, weight)?;
        product = Some(FixedPoint::mul_down(product.unwrap_or(ONE), factor)?);
    }
    Ok(product)
}

fn scaled_balances(tokens: &[PricedToken], raw: &[U256], rates: &[U256]) -> MathResult<Vec<U256>> {
    tokens
        .iter()
        .zip(raw)
        .zip(rates)
        .map(|((token, balance), rate)| {
            FixedPoint::mul_down(*balance, token.scaling_factor(*rate)?)
        })
        .collect()
}

/// Baseline/watermark accountant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFeeAccountant {
    baseline: Option<FeeBaseline>,
    /// Zero until the first observation of the rate product
    all_time_high_rate_product: U256,
}

impl ProtocolFeeAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    fn swap_growth_fee(&self, inputs: &FeeInputs<'_>) -> MathResult<U256> {
        let Some(baseline) = &self.baseline else {
            return Ok(U256::zero());
        };
        if inputs.percentages.swap.is_zero() {
            return Ok(U256::zero());
        }

        let balances = scaled_balances(inputs.tokens, inputs.raw_balances, &baseline.rates)?;
        let current = StableMath::calculate_invariant(inputs.amp1, inputs.amp2, &balances)?;

        let base = if (baseline.amp1, baseline.amp2) == (inputs.amp1, inputs.amp2) {
            baseline.invariant
        } else {
            StableMath::calculate_invariant(inputs.amp1, inputs.amp2, &baseline.balances)?
        };

        let fee = growth_fee(inputs.supply, inputs.percentages.swap, base, current)?;
        debug!(
            base = %base,
            current = %current,
            fee = %fee,
            "Swap fee growth assessed"
        );
        Ok(fee)
    }

    /// Yield fee and the watermark to store afterwards
    fn yield_growth_fee(&self, inputs: &FeeInputs<'_>) -> MathResult<(U256, Option<U256>)> {
        let Some(product) = rate_product(inputs.tokens, inputs.rates)? else {
            return Ok((U256::zero(), None));
        };

        let watermark = self.all_time_high_rate_product;
        if watermark.is_zero() {
            return Ok((U256::zero(), Some(product)));
        }
        if product <= watermark {
            return Ok((U256::zero(), None));
        }

        let fee = growth_fee(inputs.supply, inputs.percentages.yield_fee, watermark, product)?;
        debug!(
            watermark = FixedPoint::to_f64(watermark),
            product = FixedPoint::to_f64(product),
            fee = %fee,
            "Yield growth assessed"
        );
        Ok((fee, Some(product)))
    }
}

impl FeeAccountant for ProtocolFeeAccountant {
    fn pending(&self, inputs: &FeeInputs<'_>) -> MathResult<Settlement> {
        let swap_fee_shares = self.swap_growth_fee(inputs)?;
        let (yield_fee_shares, next_watermark) = self.yield_growth_fee(inputs)?;
        Ok(Settlement {
            swap_fee_shares,
            yield_fee_shares,
            next_watermark,
        })
    }

    fn settle(&mut self, inputs: &FeeInputs<'_>) -> MathResult<Settlement> {
        let settlement = self.pending(inputs)?;
        if let Some(watermark) = settlement.next_watermark {
            self.all_time_high_rate_product = watermark;
        }
        Ok(settlement)
    }

    fn rebaseline(&mut self, inputs: &FeeInputs<'_>) -> MathResult<U256> {
        let balances = scaled_balances(inputs.tokens, inputs.raw_balances, inputs.rates)?;
        let invariant = StableMath::calculate_invariant(inputs.amp1, inputs.amp2, &balances)?;

        if self.all_time_high_rate_product.is_zero() {
            if let Some(product) = rate_product(inputs.tokens, inputs.rates)? {
                self.all_time_high_rate_product = product;
            }
        }

        self.baseline = Some(FeeBaseline {
            amp1: inputs.amp1,
            amp2: inputs.amp2,
            invariant,
            balances,
            rates: inputs.rates.to_vec(),
        });
        Ok(invariant)
    }

    fn scale_baseline(&mut self, numerator: U256, denominator: U256) -> MathResult<()> {
        let Some(baseline) = self.baseline.as_mut() else {
            return Ok(());
        };
        let scale = |value: U256| {
            FixedPoint::div_raw_down(FixedPoint::mul(value, numerator)?, denominator)
        };
        baseline.invariant = scale(baseline.invariant)?;
        for balance in baseline.balances.iter_mut() {
            *balance = scale(*balance)?;
        }
        Ok(())
    }

    fn baseline(&self) -> Option<&FeeBaseline> {
        self.baseline.as_ref()
    }

    fn yield_watermark(&self) -> U256 {
        self.all_time_high_rate_product
    }
}
