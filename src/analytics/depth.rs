//! Depth metrics (fast cycle)
//!
//! Top-20 levels per side plus total resting quantity over *all* known
//! levels and the bid/ask imbalance in [-1, 1].

use rust_decimal::prelude::ToPrimitive;

use crate::error::CalcError;
use crate::market::{BookLevel, OrderBook, Side};

/// Depth snapshot for the report
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMetrics {
    /// Top bids, descending
    pub bids: Vec<BookLevel>,

    /// Top asks, ascending
    pub asks: Vec<BookLevel>,

    /// Sum over all bid levels, not only the top slice
    pub total_bid_qty: f64,

    /// Sum over all ask levels
    pub total_ask_qty: f64,

    /// (B − A) / (B + A); 0.0 when both sides sum to zero
    pub imbalance: f64,
}

/// Compute depth metrics
///
/// Fails with `EmptyBook` when either side has no levels.
pub fn calculate_depth(book: &OrderBook) -> Result<DepthMetrics, CalcError> {
    if book.depth(Side::Buy) == 0 || book.depth(Side::Sell) == 0 {
        return Err(CalcError::EmptyBook);
    }

    let total_bid_qty = book.total_qty(Side::Buy).to_f64().unwrap_or(0.0);
    let total_ask_qty = book.total_qty(Side::Sell).to_f64().unwrap_or(0.0);

    Ok(DepthMetrics {
        bids: book.top_bids().to_vec(),
        asks: book.top_asks().to_vec(),
        total_bid_qty,
        total_ask_qty,
        imbalance: imbalance(total_bid_qty, total_ask_qty),
    })
}

/// (B − A) / (B + A), clamped by construction to [-1, 1]
pub fn imbalance(total_bid_qty: f64, total_ask_qty: f64) -> f64 {
    let total = total_bid_qty + total_ask_qty;
    if total <= 0.0 {
        return 0.0;
    }
    (total_bid_qty - total_ask_qty) / total
}
