//! Stable Math and Fee Accounting Property Tests
//!
//! Properties that must hold for any balances and amplification pair inside
//! the pool's bounds, not just the hand-picked cases in the unit tests.

use proptest::prelude::*;
use stable_pool_amm::protocol_fees::{FeeInputs, ProtocolFeePercentages};
use stable_pool_amm::{
    FeeAccountant, PricedToken, ProtocolFeeAccountant, StableMath, AMP_PRECISION, ONE, U256,
};

fn units(value: u64) -> U256 {
    U256::from(value) * ONE
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Stable pair valued at `rates`, 50% yield fee, no swap fee
fn fee_inputs<'a>(
    tokens: &'a [PricedToken],
    raw_balances: &'a [U256],
    rates: &'a [U256],
) -> FeeInputs<'a> {
    let amp = U256::from(200u64) * AMP_PRECISION;
    FeeInputs {
        tokens,
        raw_balances,
        rates,
        amp1: amp,
        amp2: amp,
        supply: units(2_000),
        percentages: ProtocolFeePercentages {
            swap: U256::zero(),
            yield_fee: ONE / U256::from(2u8),
        },
    }
}

// Property test strategies
prop_compose! {
    /// Two coefficients within a factor of two of each other
    fn amp_pair()
        (amp1 in 1u64..=5000u64, ratio_percent in 50u64..=200u64) -> (U256, U256) {
        let amp2 = (amp1 * ratio_percent / 100).clamp(1, 5000);
        (U256::from(amp1) * AMP_PRECISION, U256::from(amp2) * AMP_PRECISION)
    }
}

prop_compose! {
    fn pool_balances()
        (whole in prop::collection::vec(10_000u64..1_000_000u64, 2..=5)) -> Vec<U256> {
        whole.into_iter().map(units).collect()
    }
}

prop_compose! {
    fn swap_fee()
        (micro_percent in 1_000u64..=10_000_000u64) -> U256 {
        // 0.0001% to 1%
        U256::from(micro_percent) * U256::exp10(9)
    }
}

prop_compose! {
    fn rate()
        (value in 500_000_000_000_000_000u64..2_000_000_000_000_000_000u64) -> U256 {
        U256::from(value)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_invariant_increases_with_any_balance(
        (amp1, amp2) in amp_pair(),
        balances in pool_balances(),
        token in any::<prop::sample::Index>(),
        added in 1u64..100_000u64,
    ) {
        let before = StableMath::calculate_invariant(amp1, amp2, &balances).unwrap();

        let mut grown = balances.clone();
        let index = token.index(grown.len());
        grown[index] += units(added);
        let after = StableMath::calculate_invariant(amp1, amp2, &grown).unwrap();

        prop_assert!(after > before, "invariant fell from {} to {}", before, after);
    }

    #[test]
    fn prop_given_out_inverts_given_in(
        (amp1, amp2) in amp_pair(),
        balances in pool_balances(),
        per_mille in 1u64..=100u64,
    ) {
        let invariant = StableMath::calculate_invariant(amp1, amp2, &balances).unwrap();
        let amount_in = balances[0].min(balances[1]) * U256::from(per_mille) / U256::from(1_000u64);

        let amount_out =
            StableMath::calc_out_given_in(amp1, amp2, &balances, 0, 1, amount_in, invariant).unwrap();
        prop_assert!(amount_out < balances[1]);

        let required_in =
            StableMath::calc_in_given_out(amp1, amp2, &balances, 0, 1, amount_out, invariant).unwrap();

        let tolerance = amount_in / U256::from(1_000_000_000u64) + U256::from(1_000_000u64);
        prop_assert!(abs_diff(required_in, amount_in) <= tolerance);
    }

    #[test]
    fn prop_single_token_join_then_exit_never_profits(
        (amp1, amp2) in amp_pair(),
        balances in pool_balances(),
        per_mille in 1u64..=100u64,
        fee in swap_fee(),
    ) {
        let supply = StableMath::calculate_invariant(amp1, amp2, &balances).unwrap();
        let mut amounts_in = vec![U256::zero(); balances.len()];
        amounts_in[0] = balances[0] * U256::from(per_mille) / U256::from(1_000u64);

        let share_out = StableMath::calc_bpt_out_given_exact_tokens_in(
            amp1, amp2, &balances, &amounts_in, supply, supply, fee,
        ).unwrap();

        let mut joined = balances.clone();
        joined[0] += amounts_in[0];
        let invariant = StableMath::calculate_invariant(amp1, amp2, &joined).unwrap();

        let amount_out = StableMath::calc_token_out_given_exact_bpt_in(
            amp1, amp2, &joined, 0, share_out, supply + share_out, invariant, fee,
        ).unwrap();

        prop_assert!(amount_out <= amounts_in[0]);
    }

    #[test]
    fn prop_yield_watermark_never_decreases(
        initial in rate(),
        observed in prop::collection::vec(rate(), 1..12),
    ) {
        let tokens = vec![
            PricedToken::new("DAI", 18),
            PricedToken::new("sDAI", 18).with_rate_provider().with_yield_weight(ONE),
        ];
        let raw_balances = vec![units(1_000), units(1_000)];
        let mut accountant = ProtocolFeeAccountant::new();
        let initial_rates = [ONE, initial];
        accountant.rebaseline(&fee_inputs(&tokens, &raw_balances, &initial_rates)).unwrap();
        prop_assert_eq!(accountant.yield_watermark(), initial);

        for rate in observed {
            let previous = accountant.yield_watermark();
            let rates = [ONE, rate];
            let settlement = accountant.settle(&fee_inputs(&tokens, &raw_balances, &rates)).unwrap();

            prop_assert_eq!(accountant.yield_watermark(), previous.max(rate));
            if rate <= previous {
                prop_assert!(settlement.yield_fee_shares.is_zero());
            } else {
                prop_assert!(settlement.yield_fee_shares < units(1_000));
            }
            prop_assert!(settlement.swap_fee_shares.is_zero());
        }
    }
}
