//! Lazily refreshed token rate cache
//!
//! Rates are fetched from the [`RateSource`] only when an entry has expired,
//! and always before scaling factors are derived for an operation. Tokens
//! without a rate provider have no entry and a fixed rate of one.

use crate::errors::{PoolError, RateSourceError, Result};
use crate::fixed_point::{FixedPoint, ONE};
use crate::pool_traits::RateSource;
use crate::registry::PricedToken;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Cached rate of one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRateCache {
    pub rate: U256,
    /// Rate before the most recent refresh
    pub old_rate: U256,
    pub duration: u64,
    pub expires: u64,
}

impl TokenRateCache {
    fn new(duration: u64) -> Self {
        Self {
            rate: ONE,
            old_rate: ONE,
            duration,
            expires: 0,
        }
    }

    fn never_fetched(&self) -> bool {
        self.expires == 0
    }
}

/// One optional entry per priced token, in priced-token order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCache {
    entries: Vec<Option<TokenRateCache>>,
}

impl RateCache {
    /// Entries for tokens with a rate provider; nothing is fetched yet
    pub fn new(tokens: &[PricedToken], durations: &[u64]) -> Self {
        let entries = tokens
            .iter()
            .zip(durations)
            .map(|(token, duration)| {
                token
                    .has_rate_provider
                    .then(|| TokenRateCache::new(*duration))
            })
            .collect();
        Self { entries }
    }

    pub fn entry(&self, index: usize) -> Option<&TokenRateCache> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn get_rate(&self, index: usize) -> U256 {
        self.entry(index).map_or(ONE, |entry| entry.rate)
    }

    pub fn rates(&self) -> Vec<U256> {
        (0..self.entries.len()).map(|i| self.get_rate(i)).collect()
    }

    /// Refresh every expired entry; fetch failures abort the whole refresh
    pub fn refresh_expired(
        &mut self,
        tokens: &[PricedToken],
        source: &dyn RateSource,
        now: u64,
    ) -> Result<()> {
        for (index, token) in tokens.iter().enumerate() {
            self.refresh_if_expired(index, token, source, now)?;
        }
        Ok(())
    }

    /// Refresh one entry when `now >= expires`; returns whether it was refreshed
    pub fn refresh_if_expired(
        &mut self,
        index: usize,
        token: &PricedToken,
        source: &dyn RateSource,
        now: u64,
    ) -> Result<bool> {
        match self.entries.get(index) {
            Some(Some(entry)) if now >= entry.expires => {
                self.refresh(index, token, source, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Refresh one entry regardless of expiry
    pub fn refresh(
        &mut self,
        index: usize,
        token: &PricedToken,
        source: &dyn RateSource,
        now: u64,
    ) -> Result<()> {
        let entry = self.entry_mut(index, token)?;

        let rate = source.fetch_rate(&token.id)?;
        if rate.is_zero() {
            return Err(RateSourceError::ZeroRate {
                token: token.id.to_string(),
            }
            .into());
        }

        entry.old_rate = if entry.never_fetched() { rate } else { entry.rate };
        entry.rate = rate;
        entry.expires = now.saturating_add(entry.duration).max(1);

        debug!(
            token = %token.id,
            rate = FixedPoint::to_f64(rate),
            expires = entry.expires,
            "Token rate refreshed"
        );
        Ok(())
    }

    /// Change the cache duration of one entry and refresh it immediately
    pub fn set_duration(
        &mut self,
        index: usize,
        token: &PricedToken,
        duration: u64,
        source: &dyn RateSource,
        now: u64,
    ) -> Result<()> {
        self.entry_mut(index, token)?.duration = duration;
        self.refresh(index, token, source, now)?;
        info!(token = %token.id, duration, "Token rate cache duration updated");
        Ok(())
    }

    fn entry_mut(&mut self, index: usize, token: &PricedToken) -> Result<&mut TokenRateCache> {
        self.entries
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                PoolError::InvalidParameters(format!("token {} has no rate provider", token.id))
            })
    }
}
