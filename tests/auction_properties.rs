//! Pricing engine properties

use chrono::{Duration, TimeZone, Utc};
use ethers::types::U256;
use lockstep_coordinator::auction::{current_price, dst_token_amount, validate_quote, PRICE_SCALE};
use lockstep_coordinator::model::AuctionParams;
use proptest::prelude::*;

fn auction(start: u64, end: u64, duration: u64) -> AuctionParams {
    AuctionParams {
        start_price: U256::from(start),
        end_price: U256::from(end),
        duration_secs: duration,
        start_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

proptest! {
    /// For any t1 <= t2: price(t1) >= price(t2) >= end_price.
    #[test]
    fn price_is_monotonically_non_increasing(
        end in 1u64..1_000_000_000,
        spread in 0u64..1_000_000_000,
        duration in 1u64..86_400,
        t1 in 0i64..200_000,
        dt in 0i64..200_000,
    ) {
        let a = auction(end + spread, end, duration);
        let p1 = current_price(&a, a.start_time + Duration::seconds(t1));
        let p2 = current_price(&a, a.start_time + Duration::seconds(t1 + dt));

        prop_assert!(p1 >= p2);
        prop_assert!(p2 >= a.end_price);
        prop_assert!(p1 <= a.start_price);
    }

    /// Once the window has elapsed the price is exactly the floor.
    #[test]
    fn elapsed_auction_sits_on_the_floor(
        end in 1u64..1_000_000_000,
        spread in 0u64..1_000_000_000,
        duration in 1u64..86_400,
        after in 0i64..1_000_000,
    ) {
        let a = auction(end + spread, end, duration);
        let at = a.start_time + Duration::seconds(duration as i64 + after);
        prop_assert_eq!(current_price(&a, at), a.end_price);
    }

    /// The current price itself is always an acceptable quote.
    #[test]
    fn current_price_always_validates(
        end in 1u64..1_000_000_000,
        spread in 0u64..1_000_000_000,
        duration in 1u64..86_400,
        t in 0i64..200_000,
    ) {
        let a = auction(end + spread, end, duration);
        let at = a.start_time + Duration::seconds(t);
        let quote = current_price(&a, at);
        prop_assert!(validate_quote(&a, quote, at).is_ok());
    }

    /// Anything above the curve or below the floor is rejected.
    #[test]
    fn quotes_outside_the_band_never_validate(
        end in 2u64..1_000_000_000,
        spread in 0u64..1_000_000_000,
        duration in 1u64..86_400,
        t in 0i64..200_000,
    ) {
        let a = auction(end + spread, end, duration);
        let at = a.start_time + Duration::seconds(t);
        let above = current_price(&a, at) + U256::one();
        let below = a.end_price - U256::one();
        prop_assert!(validate_quote(&a, above, at).is_err());
        prop_assert!(validate_quote(&a, below, at).is_err());
    }

    /// At par and equal decimals, conversion is the identity.
    #[test]
    fn par_conversion_is_identity(amount in 0u64..u64::MAX, decimals in 0u8..18) {
        let out = dst_token_amount(
            U256::from(amount),
            decimals,
            decimals,
            U256::from(PRICE_SCALE),
        ).unwrap();
        prop_assert_eq!(out, U256::from(amount));
    }

    /// Conversion never rounds up: reconstructing the source amount from
    /// the output cannot exceed the original.
    #[test]
    fn conversion_truncates_toward_zero(
        amount in 1u64..u64::MAX,
        price in 1u64..100_000_000,
    ) {
        let out = dst_token_amount(U256::from(amount), 6, 6, U256::from(price)).unwrap();
        // out = floor(amount * price / SCALE)
        prop_assert!(out * U256::from(PRICE_SCALE) <= U256::from(amount) * U256::from(price));
        prop_assert!(
            (out + U256::one()) * U256::from(PRICE_SCALE)
                > U256::from(amount) * U256::from(price)
        );
    }
}
