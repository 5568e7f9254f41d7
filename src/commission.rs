//! Commission tiering and payout rules for creator storefronts.
//!
//! The rate is a step function of the creator's lifetime completed sale
//! count and is always evaluated with the count *before* the sale being
//! priced. The platform absorbs processor fees out of its own share, so
//! creator earnings are simply `price * (1 - rate)`.

/// Minimum available balance before a payout run includes a creator.
pub const PAYOUT_MINIMUM_CENTS: i64 = 25_00;

/// Commission rate in basis points for a creator with `prior_sales`
/// completed sales.
pub fn commission_rate_bps(prior_sales: i64) -> i32 {
    match prior_sales {
        0..=49 => 1500,
        50..=199 => 1200,
        200..=499 => 1000,
        _ => 800,
    }
}

/// Creator's cut of a sale, in cents. Rounds down.
pub fn creator_earnings_cents(price_cents: i64, rate_bps: i32) -> i64 {
    price_cents * (10_000 - rate_bps as i64) / 10_000
}

/// Discounted price after a percent-off promotion. Rounds down.
pub fn discounted_price_cents(price_cents: i64, percent_off: i32) -> i64 {
    price_cents * (100 - percent_off as i64) / 100
}

pub fn payout_eligible(balance_cents: i64) -> bool {
    balance_cents >= PAYOUT_MINIMUM_CENTS
}
