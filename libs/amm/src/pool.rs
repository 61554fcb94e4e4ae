//! Composable stable pool orchestrator
//!
//! Every state-changing call follows the same phases:
//!
//! 1. refresh expired token rates and derive scaling factors
//! 2. read the current amplification
//! 3. settle protocol fees accrued since the last baseline
//! 4. execute the requested operation on immutable copies of the balances
//! 5. charge the protocol's cut of the operation's own fee growth
//! 6. rebaseline the fee accountant on the post-operation balances
//!
//! All of it runs on a checkpoint of the mutable state; any error restores
//! the checkpoint so a failed call leaves no trace.

use crate::amplification::{AmplificationCoefficient, AmplificationManager};
use crate::errors::{PoolError, Result};
use crate::fixed_point::FixedPoint;
use crate::operations::{
    ExitOutcome, ExitRequest, InitializeOutcome, JoinOutcome, JoinRequest, LedgerSnapshot,
    SwapKind, SwapOutcome, SwapRequest,
};
use crate::params::{check_swap_fee_percentage, PoolParams};
use crate::pool_traits::{
    AmplificationSource, Authorization, FeeAccountant, ProtocolFeeProvider, RateSource,
};
use crate::protocol_fees::{operation_fee, FeeInputs, ProtocolFeeAccountant, ProtocolFeePercentages};
use crate::rate_cache::{RateCache, TokenRateCache};
use crate::registry::{downscale_down, downscale_up, upscale, upscale_all, TokenId, TokenRegistry};
use crate::stable_math::StableMath;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shares preminted into custody at creation (2^111)
pub const PREMINTED_SUPPLY: U256 = U256([0, 1 << 47, 0, 0]);

/// Shares locked forever at initialization
pub const MINIMUM_SHARE: U256 = U256([1_000_000, 0, 0, 0]);

/// Issued versus circulating share tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSupply {
    /// Constant preminted amount
    pub total_issued: U256,
    /// Shares outside custody; all proportional math uses this
    pub virtual_supply: U256,
}

/// Both amplification coefficients at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmplificationParameters {
    pub amp1: U256,
    pub amp1_ramping: bool,
    pub amp2: U256,
    pub amp2_ramping: bool,
    pub precision: U256,
}

/// Per-call valuation of the pool
#[derive(Debug, Clone)]
struct PricingContext {
    raw_balances: Vec<U256>,
    rates: Vec<U256>,
    scaling_factors: Vec<U256>,
    balances: Vec<U256>,
    amp1: U256,
    amp2: U256,
}

struct Checkpoint<F> {
    rate_cache: RateCache,
    fees: F,
    supply: ShareSupply,
    initialized: bool,
}

fn fee_inputs<'a>(
    registry: &'a TokenRegistry,
    context: &'a PricingContext,
    raw_balances: &'a [U256],
    supply: U256,
    percentages: ProtocolFeePercentages,
) -> FeeInputs<'a> {
    FeeInputs {
        tokens: registry.priced_tokens(),
        raw_balances,
        rates: &context.rates,
        amp1: context.amp1,
        amp2: context.amp2,
        supply,
        percentages,
    }
}

pub struct ComposableStablePool<A = AmplificationManager, F = ProtocolFeeAccountant>
where
    A: AmplificationSource,
    F: FeeAccountant + Clone,
{
    registry: TokenRegistry,
    swap_fee_percentage: U256,
    amplification: A,
    rate_cache: RateCache,
    fees: F,
    rate_source: Arc<dyn RateSource>,
    protocol_fees: Arc<dyn ProtocolFeeProvider>,
    supply: ShareSupply,
    initialized: bool,
    recovery_mode: bool,
}

impl ComposableStablePool {
    /// Create an uninitialized pool with the default amplification manager and accountant
    pub fn new(
        params: PoolParams,
        rate_source: Arc<dyn RateSource>,
        protocol_fees: Arc<dyn ProtocolFeeProvider>,
    ) -> Result<Self> {
        params.validate()?;
        let amplification = AmplificationManager::new(params.amp1, params.amp2)?;
        Self::with_components(
            params,
            amplification,
            ProtocolFeeAccountant::new(),
            rate_source,
            protocol_fees,
        )
    }
}

impl<A, F> ComposableStablePool<A, F>
where
    A: AmplificationSource,
    F: FeeAccountant + Clone,
{
    pub fn with_components(
        params: PoolParams,
        amplification: A,
        fees: F,
        rate_source: Arc<dyn RateSource>,
        protocol_fees: Arc<dyn ProtocolFeeProvider>,
    ) -> Result<Self> {
        params.validate()?;
        let rate_cache = RateCache::new(
            params.registry.priced_tokens(),
            &params.rate_cache_durations,
        );

        info!(
            tokens = params.registry.priced_len(),
            share_index = params.registry.share_index(),
            amp1 = params.amp1,
            amp2 = params.amp2,
            "Composable stable pool created"
        );

        Ok(Self {
            registry: params.registry,
            swap_fee_percentage: params.swap_fee_percentage,
            amplification,
            rate_cache,
            fees,
            rate_source,
            protocol_fees,
            supply: ShareSupply {
                total_issued: PREMINTED_SUPPLY,
                virtual_supply: U256::zero(),
            },
            initialized: false,
            recovery_mode: false,
        })
    }

    // ---------------------------------------------------------------------
    // Liquidity operations
    // ---------------------------------------------------------------------

    /// Seed the pool; the share entry of `amounts_in_including_share` is ignored
    pub fn initialize(
        &mut self,
        amounts_in_including_share: &[U256],
        ledger: &LedgerSnapshot,
    ) -> Result<InitializeOutcome> {
        self.atomically(|pool| pool.initialize_inner(amounts_in_including_share, ledger))
    }

    pub fn swap(&mut self, request: &SwapRequest, ledger: &LedgerSnapshot) -> Result<SwapOutcome> {
        self.atomically(|pool| pool.swap_inner(request, ledger))
    }

    pub fn join(&mut self, request: &JoinRequest, ledger: &LedgerSnapshot) -> Result<JoinOutcome> {
        if let JoinRequest::Init {
            amounts_in_including_share,
        } = request
        {
            let outcome = self.initialize(amounts_in_including_share, ledger)?;
            let (amounts_in, _) = self
                .registry
                .split_share(&outcome.amounts_in_including_share)?;
            return Ok(JoinOutcome {
                share_out: outcome.share_to_caller,
                amounts_in,
                protocol_fee_share: U256::zero(),
            });
        }
        self.atomically(|pool| pool.join_inner(request, ledger))
    }

    pub fn exit(&mut self, request: &ExitRequest, ledger: &LedgerSnapshot) -> Result<ExitOutcome> {
        self.atomically(|pool| pool.exit_inner(request, ledger))
    }

    // ---------------------------------------------------------------------
    // Read-only queries
    // ---------------------------------------------------------------------

    /// Virtual supply plus protocol fees that the next operation would mint
    pub fn get_actual_supply(&self, ledger: &LedgerSnapshot) -> Result<U256> {
        self.ensure_initialized()?;
        let context = self.context_with_rates(ledger)?;
        let pending = self.fees.pending(&fee_inputs(
            &self.registry,
            &context,
            &context.raw_balances,
            self.supply.virtual_supply,
            self.percentages(),
        ))?;
        Ok(FixedPoint::add(self.supply.virtual_supply, pending.total()?)?)
    }

    /// Value of one share in invariant units
    pub fn get_rate(&self, ledger: &LedgerSnapshot) -> Result<U256> {
        self.ensure_initialized()?;
        let context = self.context_with_rates(ledger)?;
        let invariant =
            StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;
        let supply = self.get_actual_supply(ledger)?;
        Ok(FixedPoint::div_down(invariant, supply)?)
    }

    pub fn amplification_parameter(&self, now: u64) -> AmplificationParameters {
        let (amp1, amp1_ramping) = self
            .amplification
            .current_value(AmplificationCoefficient::Sum, now);
        let (amp2, amp2_ramping) = self
            .amplification
            .current_value(AmplificationCoefficient::Product, now);
        AmplificationParameters {
            amp1,
            amp1_ramping,
            amp2,
            amp2_ramping,
            precision: crate::stable_math::AMP_PRECISION,
        }
    }

    pub fn token_rate_cache(&self, token: &TokenId) -> Result<TokenRateCache> {
        let index = self.priced_index_of(token)?;
        self.rate_cache.entry(index).copied().ok_or_else(|| {
            PoolError::InvalidParameters(format!("token {} has no rate provider", token))
        })
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    pub fn share_supply(&self) -> ShareSupply {
        self.supply
    }

    pub fn swap_fee_percentage(&self) -> U256 {
        self.swap_fee_percentage
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn in_recovery_mode(&self) -> bool {
        self.recovery_mode
    }

    pub fn fee_accountant(&self) -> &F {
        &self.fees
    }

    // ---------------------------------------------------------------------
    // Rate cache maintenance and governance
    // ---------------------------------------------------------------------

    /// Refresh one token's rate regardless of expiry; open to anyone
    pub fn update_token_rate_cache(&mut self, token: &TokenId, now: u64) -> Result<()> {
        let index = self.priced_index_of(token)?;
        let priced = &self.registry.priced_tokens()[index];
        self.rate_cache
            .refresh(index, priced, self.rate_source.as_ref(), now)
    }

    pub fn set_token_rate_cache_duration(
        &mut self,
        authorization: &Authorization,
        token: &TokenId,
        duration: u64,
        now: u64,
    ) -> Result<()> {
        let index = self.priced_index_of(token)?;
        self.atomically(|pool| {
            let priced = &pool.registry.priced_tokens()[index];
            pool.rate_cache
                .set_duration(index, priced, duration, pool.rate_source.as_ref(), now)
        })?;
        debug!(grantee = authorization.grantee(), token = %token, "Rate cache duration set");
        Ok(())
    }

    pub fn start_amplification_update(
        &mut self,
        authorization: &Authorization,
        coefficient: AmplificationCoefficient,
        raw_end_value: u64,
        end_time: u64,
        now: u64,
    ) -> Result<()> {
        self.amplification
            .start_update(coefficient, raw_end_value, end_time, now)?;
        debug!(grantee = authorization.grantee(), ?coefficient, "Amplification update authorized");
        Ok(())
    }

    pub fn stop_amplification_update(
        &mut self,
        authorization: &Authorization,
        coefficient: AmplificationCoefficient,
        now: u64,
    ) -> Result<()> {
        self.amplification.stop_update(coefficient, now)?;
        debug!(grantee = authorization.grantee(), ?coefficient, "Amplification stop authorized");
        Ok(())
    }

    pub fn set_swap_fee_percentage(
        &mut self,
        authorization: &Authorization,
        swap_fee_percentage: U256,
    ) -> Result<()> {
        check_swap_fee_percentage(swap_fee_percentage)?;
        self.swap_fee_percentage = swap_fee_percentage;
        info!(
            grantee = authorization.grantee(),
            fee = FixedPoint::to_f64(swap_fee_percentage),
            "Swap fee percentage updated"
        );
        Ok(())
    }

    /// Toggle recovery mode; leaving it restarts fee accounting from the current state
    pub fn set_recovery_mode(
        &mut self,
        authorization: &Authorization,
        enabled: bool,
        ledger: &LedgerSnapshot,
    ) -> Result<()> {
        if enabled == self.recovery_mode {
            return Ok(());
        }

        if !enabled && self.initialized {
            self.atomically(|pool| {
                let context = pool.prepare(ledger)?;
                // Growth during recovery is not charged; settle with fees still off
                pool.settle_fees(&context)?;
                let inputs = fee_inputs(
                    &pool.registry,
                    &context,
                    &context.raw_balances,
                    pool.supply.virtual_supply,
                    pool.percentages(),
                );
                pool.fees.rebaseline(&inputs)?;
                Ok(())
            })?;
        }

        self.recovery_mode = enabled;
        info!(grantee = authorization.grantee(), enabled, "Recovery mode changed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Phases
    // ---------------------------------------------------------------------

    fn atomically<T>(&mut self, operation: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = Checkpoint {
            rate_cache: self.rate_cache.clone(),
            fees: self.fees.clone(),
            supply: self.supply,
            initialized: self.initialized,
        };

        let result = operation(self);
        if let Err(error) = &result {
            warn!(%error, "Pool operation rejected; state restored");
            self.rate_cache = checkpoint.rate_cache;
            self.fees = checkpoint.fees;
            self.supply = checkpoint.supply;
            self.initialized = checkpoint.initialized;
        }
        result
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(PoolError::Uninitialized);
        }
        Ok(())
    }

    fn priced_index_of(&self, token: &TokenId) -> Result<usize> {
        let index = self
            .registry
            .index_of(token)
            .ok_or_else(|| PoolError::UnknownToken(token.to_string()))?;
        self.registry.priced_index(index).ok_or_else(|| {
            PoolError::UnsupportedOperation("share token has no rate".to_string())
        })
    }

    fn percentages(&self) -> ProtocolFeePercentages {
        if self.recovery_mode {
            return ProtocolFeePercentages::default();
        }
        ProtocolFeePercentages {
            swap: self.protocol_fees.swap_fee_percentage(),
            yield_fee: self.protocol_fees.yield_fee_percentage(),
        }
    }

    /// Valuation with whatever rates are cached
    fn context_with_rates(&self, ledger: &LedgerSnapshot) -> Result<PricingContext> {
        let (raw_balances, _share_balance) = self.registry.split_share(&ledger.balances)?;
        let rates = self.rate_cache.rates();
        let scaling_factors = self.registry.scaling_factors(&rates)?;
        let balances = upscale_all(&raw_balances, &scaling_factors)?;
        let (amp1, amp2) = self.amplification.amplification(ledger.now);

        Ok(PricingContext {
            raw_balances,
            rates,
            scaling_factors,
            balances,
            amp1,
            amp2,
        })
    }

    /// Refresh expired rates, then value the pool
    fn prepare(&mut self, ledger: &LedgerSnapshot) -> Result<PricingContext> {
        self.registry.split_share(&ledger.balances)?;
        self.rate_cache.refresh_expired(
            self.registry.priced_tokens(),
            self.rate_source.as_ref(),
            ledger.now,
        )?;
        self.context_with_rates(ledger)
    }

    /// Mint protocol fees owed since the last baseline
    fn settle_fees(&mut self, context: &PricingContext) -> Result<U256> {
        let inputs = fee_inputs(
            &self.registry,
            context,
            &context.raw_balances,
            self.supply.virtual_supply,
            self.percentages(),
        );
        let settlement = self.fees.settle(&inputs)?;
        let owed = settlement.total()?;

        if !owed.is_zero() {
            self.supply.virtual_supply = FixedPoint::add(self.supply.virtual_supply, owed)?;
            debug!(
                swap_fee_shares = %settlement.swap_fee_shares,
                yield_fee_shares = %settlement.yield_fee_shares,
                "Protocol fees settled"
            );
        }
        Ok(owed)
    }

    /// Charge the operation's own fee growth and rebaseline on the resulting balances
    fn finish(
        &mut self,
        context: &PricingContext,
        post_raw_balances: &[U256],
        invariant_before: U256,
        supply_before: U256,
    ) -> Result<U256> {
        let supply_after = self.supply.virtual_supply;
        let percentages = self.percentages();
        let inputs = fee_inputs(
            &self.registry,
            context,
            post_raw_balances,
            supply_after,
            percentages,
        );
        let invariant_after = self.fees.rebaseline(&inputs)?;

        let owed = operation_fee(
            invariant_before,
            invariant_after,
            supply_before,
            supply_after,
            percentages.swap,
        )?;
        self.supply.virtual_supply = FixedPoint::add(supply_after, owed)?;

        debug!(
            invariant_before = %invariant_before,
            invariant_after = %invariant_after,
            protocol_fee = %owed,
            "Operation settled"
        );
        Ok(owed)
    }

    fn initialize_inner(
        &mut self,
        amounts_in_including_share: &[U256],
        ledger: &LedgerSnapshot,
    ) -> Result<InitializeOutcome> {
        if self.initialized {
            return Err(PoolError::AlreadyInitialized);
        }
        let (amounts_in, _) = self.registry.split_share(amounts_in_including_share)?;

        let context = self.prepare(ledger)?;
        if context.raw_balances.iter().any(|balance| !balance.is_zero()) {
            return Err(PoolError::InvalidParameters(
                "priced token balances must be empty before initialization".to_string(),
            ));
        }
        let scaled_in = upscale_all(&amounts_in, &context.scaling_factors)?;
        let invariant = StableMath::calculate_invariant(context.amp1, context.amp2, &scaled_in)?;
        if invariant < MINIMUM_SHARE {
            return Err(PoolError::MinimumShareNotMet {
                minimum: MINIMUM_SHARE,
                actual: invariant,
            });
        }

        self.supply.virtual_supply = invariant;
        self.initialized = true;
        let inputs = fee_inputs(
            &self.registry,
            &context,
            &amounts_in,
            invariant,
            self.percentages(),
        );
        self.fees.rebaseline(&inputs)?;

        let custody_remainder = FixedPoint::sub(PREMINTED_SUPPLY, invariant)?;
        info!(
            invariant = %invariant,
            tokens = amounts_in.len(),
            "Pool initialized"
        );

        Ok(InitializeOutcome {
            share_out: invariant,
            share_to_caller: invariant - MINIMUM_SHARE,
            minimum_locked: MINIMUM_SHARE,
            custody_remainder,
            amounts_in_including_share: self.registry.insert_share(&amounts_in, custody_remainder),
        })
    }

    fn swap_inner(&mut self, request: &SwapRequest, ledger: &LedgerSnapshot) -> Result<SwapOutcome> {
        self.ensure_initialized()?;
        if request.token_in == request.token_out {
            return Err(PoolError::UnsupportedOperation(format!(
                "swap of {} for itself",
                request.token_in
            )));
        }

        let index_in = self
            .registry
            .index_of(&request.token_in)
            .ok_or_else(|| PoolError::UnknownToken(request.token_in.to_string()))?;
        let index_out = self
            .registry
            .index_of(&request.token_out)
            .ok_or_else(|| PoolError::UnknownToken(request.token_out.to_string()))?;

        match (
            self.registry.priced_index(index_in),
            self.registry.priced_index(index_out),
        ) {
            (Some(priced_in), Some(priced_out)) => {
                self.swap_tokens(request.kind, priced_in, priced_out, request.amount, ledger)
            }
            (Some(priced_in), None) => self.swap_token_for_share(request.kind, priced_in, request.amount, ledger),
            (None, Some(priced_out)) => self.swap_share_for_token(request.kind, priced_out, request.amount, ledger),
            (None, None) => Err(PoolError::UnsupportedOperation(
                "swap of share token for itself".to_string(),
            )),
        }
    }

    fn swap_tokens(
        &mut self,
        kind: SwapKind,
        index_in: usize,
        index_out: usize,
        amount: U256,
        ledger: &LedgerSnapshot,
    ) -> Result<SwapOutcome> {
        let context = self.prepare(ledger)?;
        self.settle_fees(&context)?;
        let supply = self.supply.virtual_supply;
        let invariant = StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;

        let (amount_in, amount_out) = match kind {
            SwapKind::GivenIn => {
                let fee_amount = FixedPoint::mul_up(amount, self.swap_fee_percentage)?;
                let net_in = FixedPoint::sub(amount, fee_amount)?;
                let scaled_out = StableMath::calc_out_given_in(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    index_in,
                    index_out,
                    upscale(net_in, context.scaling_factors[index_in])?,
                    invariant,
                )?;
                (amount, downscale_down(scaled_out, context.scaling_factors[index_out])?)
            }
            SwapKind::GivenOut => {
                let scaled_in = StableMath::calc_in_given_out(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    index_in,
                    index_out,
                    upscale(amount, context.scaling_factors[index_out])?,
                    invariant,
                )?;
                let net_in = downscale_up(scaled_in, context.scaling_factors[index_in])?;
                let gross_in =
                    FixedPoint::div_up(net_in, FixedPoint::complement(self.swap_fee_percentage))?;
                (gross_in, amount)
            }
        };

        let mut post = context.raw_balances.clone();
        post[index_in] = FixedPoint::add(post[index_in], amount_in)?;
        post[index_out] = FixedPoint::sub(post[index_out], amount_out)?;

        let protocol_fee_share = self.finish(&context, &post, invariant, supply)?;
        debug!(?kind, index_in, index_out, %amount_in, %amount_out, "Swap executed");

        Ok(SwapOutcome {
            amount_in,
            amount_out,
            protocol_fee_share,
        })
    }

    fn swap_token_for_share(
        &mut self,
        kind: SwapKind,
        token_index: usize,
        amount: U256,
        ledger: &LedgerSnapshot,
    ) -> Result<SwapOutcome> {
        let request = match kind {
            SwapKind::GivenIn => {
                let mut amounts_in = vec![U256::zero(); self.registry.priced_len()];
                amounts_in[token_index] = amount;
                JoinRequest::ExactTokensInForShareOut {
                    amounts_in,
                    min_share_out: U256::zero(),
                }
            }
            SwapKind::GivenOut => JoinRequest::TokenInForExactShareOut {
                share_out: amount,
                token_index,
            },
        };

        let outcome = self.join_inner(&request, ledger)?;
        Ok(SwapOutcome {
            amount_in: outcome.amounts_in[token_index],
            amount_out: outcome.share_out,
            protocol_fee_share: outcome.protocol_fee_share,
        })
    }

    fn swap_share_for_token(
        &mut self,
        kind: SwapKind,
        token_index: usize,
        amount: U256,
        ledger: &LedgerSnapshot,
    ) -> Result<SwapOutcome> {
        let request = match kind {
            SwapKind::GivenIn => ExitRequest::ExactShareInForOneTokenOut {
                share_in: amount,
                token_index,
            },
            SwapKind::GivenOut => {
                let mut amounts_out = vec![U256::zero(); self.registry.priced_len()];
                amounts_out[token_index] = amount;
                ExitRequest::ShareInForExactTokensOut {
                    amounts_out,
                    max_share_in: U256::MAX,
                }
            }
        };

        let outcome = self.exit_inner(&request, ledger)?;
        Ok(SwapOutcome {
            amount_in: outcome.share_in,
            amount_out: outcome.amounts_out[token_index],
            protocol_fee_share: outcome.protocol_fee_share,
        })
    }

    fn join_inner(&mut self, request: &JoinRequest, ledger: &LedgerSnapshot) -> Result<JoinOutcome> {
        self.ensure_initialized()?;

        match request {
            JoinRequest::Init { .. } => Err(PoolError::AlreadyInitialized),
            JoinRequest::AllTokensInForExactShareOut { .. } => Err(PoolError::UnsupportedOperation(
                "proportional join".to_string(),
            )),
            JoinRequest::ExactTokensInForShareOut {
                amounts_in,
                min_share_out,
            } => {
                self.registry.check_priced_len(amounts_in)?;
                let context = self.prepare(ledger)?;
                self.settle_fees(&context)?;
                let supply = self.supply.virtual_supply;
                let invariant =
                    StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;

                let share_out = StableMath::calc_bpt_out_given_exact_tokens_in(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    &upscale_all(amounts_in, &context.scaling_factors)?,
                    supply,
                    invariant,
                    self.swap_fee_percentage,
                )?;
                if share_out < *min_share_out {
                    return Err(PoolError::Slippage {
                        limit_kind: "min_share_out",
                        limit: *min_share_out,
                        actual: share_out,
                    });
                }

                let post = context
                    .raw_balances
                    .iter()
                    .zip(amounts_in)
                    .map(|(balance, amount)| FixedPoint::add(*balance, *amount))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.supply.virtual_supply = FixedPoint::add(supply, share_out)?;
                let protocol_fee_share = self.finish(&context, &post, invariant, supply)?;

                Ok(JoinOutcome {
                    share_out,
                    amounts_in: amounts_in.clone(),
                    protocol_fee_share,
                })
            }
            JoinRequest::TokenInForExactShareOut {
                share_out,
                token_index,
            } => {
                self.registry.check_priced_index(*token_index)?;
                let context = self.prepare(ledger)?;
                self.settle_fees(&context)?;
                let supply = self.supply.virtual_supply;
                let invariant =
                    StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;

                let scaled_in = StableMath::calc_token_in_given_exact_bpt_out(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    *token_index,
                    *share_out,
                    supply,
                    invariant,
                    self.swap_fee_percentage,
                )?;
                let amount_in = downscale_up(scaled_in, context.scaling_factors[*token_index])?;

                let mut amounts_in = vec![U256::zero(); self.registry.priced_len()];
                amounts_in[*token_index] = amount_in;
                let mut post = context.raw_balances.clone();
                post[*token_index] = FixedPoint::add(post[*token_index], amount_in)?;

                self.supply.virtual_supply = FixedPoint::add(supply, *share_out)?;
                let protocol_fee_share = self.finish(&context, &post, invariant, supply)?;

                Ok(JoinOutcome {
                    share_out: *share_out,
                    amounts_in,
                    protocol_fee_share,
                })
            }
        }
    }

    fn exit_inner(&mut self, request: &ExitRequest, ledger: &LedgerSnapshot) -> Result<ExitOutcome> {
        self.ensure_initialized()?;

        match request {
            ExitRequest::ExactShareInForAllTokensOut { .. } => Err(PoolError::UnsupportedOperation(
                "proportional exit outside recovery mode".to_string(),
            )),
            ExitRequest::RecoveryProportional { share_in } => self.recovery_exit(*share_in, ledger),
            ExitRequest::ExactShareInForOneTokenOut {
                share_in,
                token_index,
            } => {
                self.registry.check_priced_index(*token_index)?;
                let context = self.prepare(ledger)?;
                self.settle_fees(&context)?;
                let supply = self.supply.virtual_supply;
                let invariant =
                    StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;

                let scaled_out = StableMath::calc_token_out_given_exact_bpt_in(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    *token_index,
                    *share_in,
                    supply,
                    invariant,
                    self.swap_fee_percentage,
                )?;
                let amount_out = downscale_down(scaled_out, context.scaling_factors[*token_index])?;

                let mut amounts_out = vec![U256::zero(); self.registry.priced_len()];
                amounts_out[*token_index] = amount_out;
                let mut post = context.raw_balances.clone();
                post[*token_index] = FixedPoint::sub(post[*token_index], amount_out)?;

                self.supply.virtual_supply = FixedPoint::sub(supply, *share_in)?;
                let protocol_fee_share = self.finish(&context, &post, invariant, supply)?;

                Ok(ExitOutcome {
                    share_in: *share_in,
                    amounts_out,
                    protocol_fee_share,
                })
            }
            ExitRequest::ShareInForExactTokensOut {
                amounts_out,
                max_share_in,
            } => {
                self.registry.check_priced_len(amounts_out)?;
                let context = self.prepare(ledger)?;
                self.settle_fees(&context)?;
                let supply = self.supply.virtual_supply;
                let invariant =
                    StableMath::calculate_invariant(context.amp1, context.amp2, &context.balances)?;

                let share_in = StableMath::calc_bpt_in_given_exact_tokens_out(
                    context.amp1,
                    context.amp2,
                    &context.balances,
                    &upscale_all(amounts_out, &context.scaling_factors)?,
                    supply,
                    invariant,
                    self.swap_fee_percentage,
                )?;
                if share_in > *max_share_in {
                    return Err(PoolError::Slippage {
                        limit_kind: "max_share_in",
                        limit: *max_share_in,
                        actual: share_in,
                    });
                }

                let post = context
                    .raw_balances
                    .iter()
                    .zip(amounts_out)
                    .map(|(balance, amount)| FixedPoint::sub(*balance, *amount))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.supply.virtual_supply = FixedPoint::sub(supply, share_in)?;
                let protocol_fee_share = self.finish(&context, &post, invariant, supply)?;

                Ok(ExitOutcome {
                    share_in,
                    amounts_out: amounts_out.clone(),
                    protocol_fee_share,
                })
            }
        }
    }

    /// Proportional exit that touches neither rates nor pricing math
    fn recovery_exit(&mut self, share_in: U256, ledger: &LedgerSnapshot) -> Result<ExitOutcome> {
        if !self.recovery_mode {
            return Err(PoolError::RecoveryModeDisabled);
        }
        let (raw_balances, _) = self.registry.split_share(&ledger.balances)?;
        let supply = self.supply.virtual_supply;

        let amounts_out =
            StableMath::compute_proportional_amounts_out(&raw_balances, supply, share_in)?;
        let remaining = FixedPoint::sub(supply, share_in)?;

        self.supply.virtual_supply = remaining;
        self.fees.scale_baseline(remaining, supply)?;

        info!(share_in = %share_in, remaining = %remaining, "Recovery exit");
        Ok(ExitOutcome {
            share_in,
            amounts_out,
            protocol_fee_share: U256::zero(),
        })
    }
}
