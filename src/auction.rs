//! Dutch-auction pricing engine
//!
//! Pure integer arithmetic; nothing in here suspends. Prices use a fixed
//! 6-decimal internal scale, amounts are token base units.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::model::AuctionParams;

use chrono::{DateTime, Utc};
use ethers::types::U256;

/// Internal price scale: one price unit is 1e-6 destination per source.
pub const PRICE_SCALE: u64 = 1_000_000;

/// Clock-skew allowance applied on top of the current price when a
/// resolver's quote is validated. Deliberately zero: resolvers quote
/// against the same price curve this process evaluates.
pub const QUOTE_SKEW_TOLERANCE: u64 = 0;

/// Price of the auction at `now`.
///
/// Linear decay from `start_price` to `end_price` over `duration_secs`,
/// fixed-point with the elapsed/duration ratio. Monotonically
/// non-increasing, clamped to `end_price` once the window has elapsed.
pub fn current_price(auction: &AuctionParams, now: DateTime<Utc>) -> U256 {
    let elapsed = (now - auction.start_time).num_seconds();
    if elapsed <= 0 {
        return auction.start_price;
    }
    let elapsed = elapsed as u64;
    if elapsed >= auction.duration_secs || auction.duration_secs == 0 {
        return auction.end_price;
    }

    let span = auction.start_price.saturating_sub(auction.end_price);
    let decay = span * U256::from(elapsed) / U256::from(auction.duration_secs);
    auction.start_price - decay
}

/// Seconds until the auction reaches its floor; zero once elapsed.
pub fn time_remaining(auction: &AuctionParams, now: DateTime<Utc>) -> u64 {
    let elapsed = (now - auction.start_time).num_seconds().max(0) as u64;
    auction.duration_secs.saturating_sub(elapsed)
}

/// Accept a resolver quote iff `end_price <= quoted <= current + tolerance`.
pub fn validate_quote(
    auction: &AuctionParams,
    quoted: U256,
    now: DateTime<Utc>,
) -> CoordinatorResult<()> {
    let current = current_price(auction, now);
    let ceiling = current + U256::from(QUOTE_SKEW_TOLERANCE);
    if quoted < auction.end_price || quoted > ceiling {
        return Err(CoordinatorError::PriceOutOfBand {
            quoted,
            floor: auction.end_price,
            current,
        });
    }
    Ok(())
}

/// Destination base units owed for `src_amount` source base units at
/// `quoted`. Division truncates toward zero.
pub fn dst_token_amount(
    src_amount: U256,
    src_decimals: u8,
    dst_decimals: u8,
    quoted: U256,
) -> CoordinatorResult<U256> {
    let overflow = || CoordinatorError::Overflow {
        operation: "dst token amount",
    };

    // Multiply the full numerator before dividing so truncation happens once.
    let numerator = src_amount
        .checked_mul(quoted)
        .and_then(|n| n.checked_mul(pow10(dst_decimals)?))
        .ok_or_else(overflow)?;
    let denominator = pow10(src_decimals)
        .and_then(|d| d.checked_mul(U256::from(PRICE_SCALE)))
        .ok_or_else(overflow)?;

    Ok(numerator / denominator)
}

fn pow10(decimals: u8) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(decimals))
}
