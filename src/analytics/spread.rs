//! Spread metrics (fast cycle)
//!
//! spread_bps, mid price, and the volume-weighted micro price off the top of
//! book. All rounding is half-even: 4 dp for spread_bps, 8 dp for prices.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::CalcError;
use crate::market::OrderBook;

/// Spread metrics computed from the best levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadMetrics {
    /// ((ask − bid) / bid) × 10 000, 4 dp
    pub spread_bps: f64,

    /// (bid + ask) / 2, 8 dp
    pub mid_price: f64,

    /// (ask·bid_qty + bid·ask_qty) / (bid_qty + ask_qty), 8 dp
    pub micro_price: f64,
}

/// Round half-even to `dp` decimal places
pub fn round_half_even(value: f64, dp: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
            .to_f64()
            .unwrap_or(value),
        None => value,
    }
}

/// Compute spread metrics
///
/// Fails with `EmptyBook` when either side is missing.
pub fn calculate_spread(book: &OrderBook) -> Result<SpreadMetrics, CalcError> {
    let bid = book.best_bid().ok_or(CalcError::EmptyBook)?;
    let ask = book.best_ask().ok_or(CalcError::EmptyBook)?;

    let bid_price = bid.price_f64();
    let ask_price = ask.price_f64();
    let bid_qty = bid.qty_f64();
    let ask_qty = ask.qty_f64();

    if bid_price <= 0.0 {
        return Err(CalcError::InsufficientData("non-positive best bid".into()));
    }

    let spread_bps = (ask_price - bid_price) / bid_price * 10_000.0;
    let mid_price = (bid_price + ask_price) / 2.0;

    let total_qty = bid_qty + ask_qty;
    let micro_price = if total_qty > 0.0 {
        (ask_price * bid_qty + bid_price * ask_qty) / total_qty
    } else {
        mid_price
    };

    Ok(SpreadMetrics {
        spread_bps: round_half_even(spread_bps, 4),
        mid_price: round_half_even(mid_price, 8),
        micro_price: round_half_even(micro_price, 8),
    })
}
