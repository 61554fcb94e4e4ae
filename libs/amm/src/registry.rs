//! Token registry and decimal/rate scaling
//!
//! The registry lists every token the host ledger tracks for the pool, in a
//! fixed order, with the pool's own share token at `share_index`. Pricing
//! math only ever sees the priced tokens, upscaled to 18 decimals and
//! multiplied by their current rate.

use crate::errors::{MathError, PoolError, Result};
use crate::fixed_point::{FixedPoint, DECIMALS, ONE};
use crate::stable_math::{MAX_STABLE_TOKENS, MIN_STABLE_TOKENS};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque token identifier assigned by the host ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token priced by the invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedToken {
    pub id: TokenId,
    pub decimals: u8,
    pub has_rate_provider: bool,
    pub exempt_from_yield_fees: bool,
    /// Exponent in the yield rate product; `None` means an equal share
    pub yield_weight: Option<U256>,
}

impl PricedToken {
    pub fn new(id: impl Into<String>, decimals: u8) -> Self {
        Self {
            id: TokenId::new(id),
            decimals,
            has_rate_provider: false,
            exempt_from_yield_fees: false,
            yield_weight: None,
        }
    }

    pub fn with_rate_provider(mut self) -> Self {
        self.has_rate_provider = true;
        self
    }

    pub fn exempt_from_yield_fees(mut self) -> Self {
        self.exempt_from_yield_fees = true;
        self
    }

    pub fn with_yield_weight(mut self, weight: U256) -> Self {
        self.yield_weight = Some(weight);
        self
    }

    /// Whether this token's rate growth is subject to yield fees
    pub fn pays_yield_fees(&self) -> bool {
        self.has_rate_provider && !self.exempt_from_yield_fees
    }

    /// `10^(18 - decimals) · rate`, applied with `mul_down` to upscale raw amounts
    pub fn scaling_factor(&self, rate: U256) -> std::result::Result<U256, MathError> {
        let decimals_difference = DECIMALS.saturating_sub(u32::from(self.decimals));
        FixedPoint::mul(rate, U256::exp10(decimals_difference as usize))
    }
}

/// Ordered token set fixed at pool creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistry {
    share_token: TokenId,
    share_index: usize,
    priced: Vec<PricedToken>,
}

impl TokenRegistry {
    pub fn new(
        share_token: TokenId,
        share_index: usize,
        mut priced: Vec<PricedToken>,
    ) -> Result<Self> {
        if !(MIN_STABLE_TOKENS..=MAX_STABLE_TOKENS).contains(&priced.len()) {
            return Err(PoolError::InvalidParameters(format!(
                "{} priced tokens, expected {}..={}",
                priced.len(),
                MIN_STABLE_TOKENS,
                MAX_STABLE_TOKENS
            )));
        }
        if share_index > priced.len() {
            return Err(PoolError::InvalidParameters(format!(
                "share index {} outside registry of {} tokens",
                share_index,
                priced.len() + 1
            )));
        }

        let mut seen = HashSet::new();
        seen.insert(share_token.clone());
        for token in &priced {
            if !seen.insert(token.id.clone()) {
                return Err(PoolError::InvalidParameters(format!(
                    "duplicate token {}",
                    token.id
                )));
            }
            if u32::from(token.decimals) > DECIMALS {
                return Err(PoolError::InvalidParameters(format!(
                    "token {} has {} decimals",
                    token.id, token.decimals
                )));
            }
        }

        let equal_weight = ONE / U256::from(priced.len());
        for token in priced.iter_mut() {
            token.yield_weight.get_or_insert(equal_weight);
        }

        Ok(Self {
            share_token,
            share_index,
            priced,
        })
    }

    /// Number of registered tokens, share token included; never zero
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.priced.len() + 1
    }

    pub fn priced_len(&self) -> usize {
        self.priced.len()
    }

    pub fn share_index(&self) -> usize {
        self.share_index
    }

    pub fn share_token(&self) -> &TokenId {
        &self.share_token
    }

    pub fn priced_tokens(&self) -> &[PricedToken] {
        &self.priced
    }

    /// Registry position of `token`
    pub fn index_of(&self, token: &TokenId) -> Option<usize> {
        if *token == self.share_token {
            return Some(self.share_index);
        }
        self.priced
            .iter()
            .position(|t| t.id == *token)
            .map(|i| self.to_registry_index(i))
    }

    /// Priced-token position of a registry index, `None` for the share token
    pub fn priced_index(&self, registry_index: usize) -> Option<usize> {
        match registry_index.cmp(&self.share_index) {
            std::cmp::Ordering::Less => Some(registry_index),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(registry_index - 1),
        }
    }

    fn to_registry_index(&self, priced_index: usize) -> usize {
        if priced_index >= self.share_index {
            priced_index + 1
        } else {
            priced_index
        }
    }

    /// Check an amount vector covering the priced tokens only
    pub fn check_priced_len(&self, amounts: &[U256]) -> Result<()> {
        if amounts.len() != self.priced.len() {
            return Err(PoolError::InputShape {
                expected: self.priced.len(),
                actual: amounts.len(),
            });
        }
        Ok(())
    }

    /// Check an index into the priced tokens
    pub fn check_priced_index(&self, index: usize) -> Result<()> {
        if index >= self.priced.len() {
            return Err(PoolError::TokenIndexOutOfBounds {
                index,
                len: self.priced.len(),
            });
        }
        Ok(())
    }

    /// Split a full registry-order vector into priced amounts and the share entry
    pub fn split_share(&self, amounts: &[U256]) -> Result<(Vec<U256>, U256)> {
        if amounts.len() != self.len() {
            return Err(PoolError::InputShape {
                expected: self.len(),
                actual: amounts.len(),
            });
        }
        let mut priced = amounts.to_vec();
        let share = priced.remove(self.share_index);
        Ok((priced, share))
    }

    /// Inverse of [`split_share`](Self::split_share)
    pub fn insert_share(&self, priced: &[U256], share: U256) -> Vec<U256> {
        let mut amounts = priced.to_vec();
        amounts.insert(self.share_index, share);
        amounts
    }

    /// Scaling factors for every priced token at the given rates
    pub fn scaling_factors(&self, rates: &[U256]) -> std::result::Result<Vec<U256>, MathError> {
        self.priced
            .iter()
            .zip(rates)
            .map(|(token, rate)| token.scaling_factor(*rate))
            .collect()
    }
}

/// Raw amount to 18-decimal rate-adjusted amount, rounded down
pub fn upscale(amount: U256, scaling_factor: U256) -> std::result::Result<U256, MathError> {
    FixedPoint::mul_down(amount, scaling_factor)
}

pub fn upscale_all(
    amounts: &[U256],
    scaling_factors: &[U256],
) -> std::result::Result<Vec<U256>, MathError> {
    amounts
        .iter()
        .zip(scaling_factors)
        .map(|(amount, factor)| upscale(*amount, *factor))
        .collect()
}

/// Scaled amount back to raw units, rounded down (amounts leaving the pool)
pub fn downscale_down(amount: U256, scaling_factor: U256) -> std::result::Result<U256, MathError> {
    FixedPoint::div_down(amount, scaling_factor)
}

/// Scaled amount back to raw units, rounded up (amounts entering the pool)
pub fn downscale_up(amount: U256, scaling_factor: U256) -> std::result::Result<U256, MathError> {
    FixedPoint::div_up(amount, scaling_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(
            TokenId::new("SPT"),
            1,
            vec![PricedToken::new("USDC", 6), PricedToken::new("DAI", 18)],
        )
        .unwrap()
    }

    #[test]
    fn test_share_index_mapping() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.len(), registry.priced_len() + 1);
        assert_eq!(registry.index_of(&TokenId::new("USDC")), Some(0));
        assert_eq!(registry.index_of(&TokenId::new("SPT")), Some(1));
        assert_eq!(registry.index_of(&TokenId::new("DAI")), Some(2));
        assert_eq!(registry.index_of(&TokenId::new("FRAX")), None);

        assert_eq!(registry.priced_index(0), Some(0));
        assert_eq!(registry.priced_index(1), None);
        assert_eq!(registry.priced_index(2), Some(1));
    }

    #[test]
    fn test_split_and_insert_share() {
        let registry = registry();
        let amounts = vec![U256::from(1u8), U256::from(2u8), U256::from(3u8)];
        let (priced, share) = registry.split_share(&amounts).unwrap();
        assert_eq!(priced, vec![U256::from(1u8), U256::from(3u8)]);
        assert_eq!(share, U256::from(2u8));
        assert_eq!(registry.insert_share(&priced, share), amounts);

        assert_eq!(
            registry.split_share(&amounts[..2]),
            Err(PoolError::InputShape {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_scaling() {
        let usdc = PricedToken::new("USDC", 6);
        let factor = usdc.scaling_factor(ONE).unwrap();
        let raw = U256::from(1_500_000u64);
        let scaled = upscale(raw, factor).unwrap();
        assert_eq!(scaled, U256::from(15u8) * ONE / U256::from(10u8));
        assert_eq!(downscale_down(scaled, factor).unwrap(), raw);

        // A 1.1 rate lifts the scaled value
        let rate = ONE + ONE / U256::from(10u8);
        let factor = usdc.scaling_factor(rate).unwrap();
        assert_eq!(
            upscale(U256::from(1_000_000u64), factor).unwrap(),
            rate
        );
        assert!(downscale_up(U256::one(), factor).unwrap() >= U256::one());
    }

    #[test]
    fn test_rejects_bad_registries() {
        assert!(TokenRegistry::new(TokenId::new("SPT"), 0, vec![PricedToken::new("A", 18)]).is_err());
        assert!(TokenRegistry::new(
            TokenId::new("SPT"),
            0,
            vec![PricedToken::new("A", 18), PricedToken::new("A", 18)]
        )
        .is_err());
        assert!(TokenRegistry::new(
            TokenId::new("SPT"),
            3,
            vec![PricedToken::new("A", 18), PricedToken::new("B", 18)]
        )
        .is_err());
        assert!(TokenRegistry::new(
            TokenId::new("SPT"),
            0,
            vec![PricedToken::new("A", 19), PricedToken::new("B", 18)]
        )
        .is_err());
    }

    #[test]
    fn test_default_yield_weights() {
        let registry = registry();
        for token in registry.priced_tokens() {
            assert_eq!(token.yield_weight, Some(ONE / U256::from(2u8)));
        }
    }
}
