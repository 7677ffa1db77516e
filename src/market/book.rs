//! Incremental L2 order book
//!
//! Maintains bid/ask price→quantity maps with a cached sorted top-N per side
//! (bids descending, asks ascending). Updated via depth deltas; a zero
//! quantity removes the price level.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::market::events::Side;

/// Depth of the cached top-of-book slice
pub const TOP_LEVELS: usize = 20;

/// One price level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

impl BookLevel {
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }

    pub fn qty_f64(&self) -> f64 {
        self.qty.to_f64().unwrap_or(0.0)
    }
}

/// L2 order book for a single symbol
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Bid levels: price → quantity (BTreeMap ascending; best bid is last)
    bids: BTreeMap<Decimal, Decimal>,

    /// Ask levels: price → quantity (best ask is first)
    asks: BTreeMap<Decimal, Decimal>,

    /// Cached top levels, bids descending
    top_bids: Vec<BookLevel>,

    /// Cached top levels, asks ascending
    top_asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            top_bids: Vec::with_capacity(TOP_LEVELS),
            top_asks: Vec::with_capacity(TOP_LEVELS),
        }
    }

    /// Apply one depth delta
    ///
    /// `qty == 0` deletes the level; deleting an unknown price is a no-op.
    /// The top-N cache for the touched side is recomputed.
    pub fn apply_delta(&mut self, side: Side, price: Decimal, qty: Decimal) {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if qty.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(price, qty);
        }
        self.rebuild_top(side);
    }

    fn rebuild_top(&mut self, side: Side) {
        match side {
            Side::Buy => {
                self.top_bids.clear();
                self.top_bids.extend(
                    self.bids
                        .iter()
                        .rev()
                        .take(TOP_LEVELS)
                        .map(|(&price, &qty)| BookLevel { price, qty }),
                );
            }
            Side::Sell => {
                self.top_asks.clear();
                self.top_asks.extend(
                    self.asks
                        .iter()
                        .take(TOP_LEVELS)
                        .map(|(&price, &qty)| BookLevel { price, qty }),
                );
            }
        }
    }

    /// Best (highest) bid
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.top_bids.first().copied()
    }

    /// Best (lowest) ask
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.top_asks.first().copied()
    }

    /// Top bids, descending by price
    pub fn top_bids(&self) -> &[BookLevel] {
        &self.top_bids
    }

    /// Top asks, ascending by price
    pub fn top_asks(&self) -> &[BookLevel] {
        &self.top_asks
    }

    /// Total quantity across all known levels of one side (not only top-N)
    pub fn total_qty(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.bids.values().copied().sum(),
            Side::Sell => self.asks.values().copied().sum(),
        }
    }

    /// Number of levels on one side
    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Replace all levels with a fresh snapshot (initial sync or resync)
    pub fn reset(&mut self, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) {
        self.bids.clear();
        self.asks.clear();
        for &(price, qty) in bids {
            if !qty.is_zero() {
                self.bids.insert(price, qty);
            }
        }
        for &(price, qty) in asks {
            if !qty.is_zero() {
                self.asks.insert(price, qty);
            }
        }
        self.rebuild_top(Side::Buy);
        self.rebuild_top(Side::Sell);
    }

    /// A crossed book (bid >= ask) is possible transiently; the caller
    /// reports it as degraded rather than rejecting the update.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    fn seeded_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_delta(Side::Buy, dec(100.0), dec(2.0));
        book.apply_delta(Side::Buy, dec(99.5), dec(5.0));
        book.apply_delta(Side::Sell, dec(100.1), dec(8.0));
        book.apply_delta(Side::Sell, dec(100.5), dec(1.0));
        book
    }

    #[test]
    fn test_best_bid_ask_ordering() {
        let book = seeded_book();
        assert_eq!(book.best_bid().unwrap().price, dec(100.0));
        assert_eq!(book.best_ask().unwrap().price, dec(100.1));
        assert_eq!(book.top_bids()[1].price, dec(99.5));
        assert_eq!(book.top_asks()[1].price, dec(100.5));
    }

    #[test]
    fn test_zero_qty_removes_level() {
        let mut book = seeded_book();
        book.apply_delta(Side::Buy, dec(100.0), Decimal::ZERO);
        assert_eq!(book.best_bid().unwrap().price, dec(99.5));
        assert_eq!(book.depth(Side::Buy), 1);
    }

    #[test]
    fn test_zero_qty_delete_is_idempotent() {
        let mut book = seeded_book();
        book.apply_delta(Side::Buy, dec(100.0), Decimal::ZERO);
        let after_first: Vec<_> = book.top_bids().to_vec();

        // Reapplying the same deletion leaves the book identical.
        book.apply_delta(Side::Buy, dec(100.0), Decimal::ZERO);
        assert_eq!(book.top_bids(), after_first.as_slice());
        assert_eq!(book.depth(Side::Buy), 1);
    }

    #[test]
    fn test_delete_unknown_price_is_noop() {
        let mut book = seeded_book();
        book.apply_delta(Side::Sell, dec(123.45), Decimal::ZERO);
        assert_eq!(book.depth(Side::Sell), 2);
    }

    #[test]
    fn test_total_qty_covers_all_levels_not_only_top() {
        let mut book = OrderBook::new();
        for i in 0..30 {
            book.apply_delta(Side::Buy, dec(100.0 - i as f64 * 0.1), dec(1.0));
        }
        assert_eq!(book.top_bids().len(), TOP_LEVELS);
        assert_eq!(book.total_qty(Side::Buy), dec(30.0));
    }

    #[test]
    fn test_crossed_book_detected() {
        let mut book = OrderBook::new();
        book.apply_delta(Side::Buy, dec(100.2), dec(1.0));
        book.apply_delta(Side::Sell, dec(100.1), dec(1.0));
        assert!(book.is_crossed());

        book.apply_delta(Side::Buy, dec(100.2), Decimal::ZERO);
        book.apply_delta(Side::Buy, dec(100.0), dec(1.0));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_update_replaces_quantity() {
        let mut book = seeded_book();
        book.apply_delta(Side::Buy, dec(100.0), dec(7.0));
        assert_eq!(book.best_bid().unwrap().qty, dec(7.0));
        assert_eq!(book.depth(Side::Buy), 2);
    }
}
