//! Shared fixtures for pool integration tests

#![allow(dead_code)]

use stable_pool_amm::{
    ComposableStablePool, FixedPoint, FixedProtocolFees, LedgerSnapshot, PoolParams, PricedToken,
    RateSource, RateSourceError, TokenId, TokenRegistry, Decimal, ONE, U256,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const DAY: u64 = 86_400;

/// Install a test subscriber once; `RUST_LOG=debug` shows pool phases
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Rate source backed by a mutable map
#[derive(Default)]
pub struct MockRates {
    rates: Mutex<HashMap<TokenId, U256>>,
    offline: Mutex<bool>,
}

impl MockRates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, token: &str, rate: U256) {
        self.rates.lock().unwrap().insert(TokenId::new(token), rate);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

impl RateSource for MockRates {
    fn fetch_rate(&self, token: &TokenId) -> Result<U256, RateSourceError> {
        if *self.offline.lock().unwrap() {
            return Err(RateSourceError::Unavailable {
                token: token.to_string(),
                reason: "oracle offline".to_string(),
            });
        }
        Ok(self
            .rates
            .lock()
            .unwrap()
            .get(token)
            .copied()
            .unwrap_or(ONE))
    }
}

/// `value` whole tokens in `decimals` native units
pub fn units(value: u64, decimals: u32) -> U256 {
    U256::from(value) * U256::exp10(decimals as usize)
}

pub fn fixed(value: Decimal) -> U256 {
    FixedPoint::from_decimal(value).unwrap()
}

pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

pub fn params(tokens: Vec<PricedToken>, amp1: u64, amp2: u64, swap_fee: Decimal) -> PoolParams {
    let durations = vec![100; tokens.len()];
    PoolParams {
        registry: TokenRegistry::new(TokenId::new("SPT"), 0, tokens).unwrap(),
        amp1,
        amp2,
        swap_fee_percentage: fixed(swap_fee),
        rate_cache_durations: durations,
    }
}

/// Pool plus the host-side bookkeeping a ledger would do
pub struct Harness {
    pub pool: ComposableStablePool,
    pub rates: Arc<MockRates>,
    pub balances: Vec<U256>,
    pub now: u64,
}

impl Harness {
    pub fn new(params: PoolParams, rates: Arc<MockRates>, protocol_fees: FixedProtocolFees) -> Self {
        init_logging();
        let priced = params.registry.priced_len();
        let pool = ComposableStablePool::new(params, rates.clone(), Arc::new(protocol_fees)).unwrap();
        Self {
            pool,
            rates,
            balances: vec![U256::zero(); priced],
            now: 1_000,
        }
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        let share_balance = self.pool.share_supply().total_issued - self.pool.share_supply().virtual_supply;
        LedgerSnapshot::new(
            self.pool.registry().insert_share(&self.balances, share_balance),
            self.now,
        )
    }

    pub fn initialize(&mut self, amounts: &[U256]) -> stable_pool_amm::InitializeOutcome {
        let amounts_including_share = self.pool.registry().insert_share(amounts, U256::zero());
        let ledger = self.ledger();
        let outcome = self.pool.initialize(&amounts_including_share, &ledger).unwrap();
        for (balance, amount) in self.balances.iter_mut().zip(amounts) {
            *balance += *amount;
        }
        outcome
    }

    pub fn apply_in(&mut self, amounts: &[U256]) {
        for (balance, amount) in self.balances.iter_mut().zip(amounts) {
            *balance += *amount;
        }
    }

    pub fn apply_out(&mut self, amounts: &[U256]) {
        for (balance, amount) in self.balances.iter_mut().zip(amounts) {
            *balance -= *amount;
        }
    }

    pub fn advance(&mut self, seconds: u64) {
        self.now += seconds;
    }
}
