//! Per-symbol market state
//!
//! `SymbolState` aggregates the order book, rolling trade windows, quantity
//! history and the activity trackers the slow-cycle detectors read. It is
//! owned exclusively by the symbol's actor; calculators only ever see `&self`.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::EventError;
use crate::market::book::OrderBook;
use crate::market::events::{DepthDelta, Side, TickerStats, TradeTick};
use crate::market::ring::{PercentileTracker, RingBuffer, PERCENTILE_CAPACITY};

/// Capacity of the 10 s trade window
const TRADES_10S_CAPACITY: usize = 4_096;

/// Capacity of the 30 s trade window
const TRADES_30S_CAPACITY: usize = 8_192;

/// Capacity of the 30 min trade window
const TRADES_30MIN_CAPACITY: usize = 65_536;

/// Spread samples kept for flash-crash comparison
const SPREAD_HISTORY_CAPACITY: usize = 64;

/// Net-flow observations kept for flash-crash comparison
const NET_FLOW_HISTORY_CAPACITY: usize = 16;

/// Bound on tracked far-from-mid levels (spoofing detector)
const FAR_LEVEL_TRACKING_LIMIT: usize = 256;

/// Cancel/update counters for one tracked price level
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelActivity {
    pub side: Option<Side>,
    pub cancels: u32,
    pub updates: u32,
}

impl LevelActivity {
    pub fn cancel_rate(&self) -> f64 {
        let total = self.cancels + self.updates;
        if total == 0 {
            return 0.0;
        }
        f64::from(self.cancels) / f64::from(total)
    }
}

/// Outcome of applying a depth batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthOutcome {
    /// Number of deltas applied (invalid ones are skipped)
    pub applied: usize,

    /// Number of deltas rejected by validation
    pub rejected: usize,

    /// The book was crossed after this batch
    pub crossed: bool,
}

/// Full per-symbol microstructure state
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,

    pub book: OrderBook,

    pub last_trade: Option<TradeTick>,

    pub trades_10s: RingBuffer<TradeTick>,
    pub trades_30s: RingBuffer<TradeTick>,
    pub trades_30min: RingBuffer<TradeTick>,

    /// Recent level quantities feeding wall/vacuum thresholds
    pub quantity_history: PercentileTracker,

    /// Latest 24 h ticker stats (zero until the first ticker event)
    pub ticker: TickerStats,

    /// Most recent event time seen (monotonic within skew tolerance)
    pub last_event_ts: i64,

    /// Set while the latest depth batch left the book crossed
    pub crossed: bool,

    /// spread_bps samples recorded each fast cycle
    spread_history: RingBuffer<Sample>,

    /// net-flow observations recorded each slow cycle
    net_flow_history: RingBuffer<Sample>,

    /// Cancel/update counters for levels further than 3× spread from mid;
    /// reset after every slow cycle so the rates stay current
    far_level_activity: HashMap<Decimal, LevelActivity>,
}

/// Timestamped f64 sample for the history rings
#[derive(Debug, Clone, Copy)]
struct Sample {
    ts: i64,
    value: f64,
}

impl crate::market::ring::Timestamped for Sample {
    fn ts_ms(&self) -> i64 {
        self.ts
    }
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, now_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            book: OrderBook::new(),
            last_trade: None,
            trades_10s: RingBuffer::new(TRADES_10S_CAPACITY),
            trades_30s: RingBuffer::new(TRADES_30S_CAPACITY),
            trades_30min: RingBuffer::new(TRADES_30MIN_CAPACITY),
            quantity_history: PercentileTracker::new(PERCENTILE_CAPACITY),
            ticker: TickerStats::default(),
            last_event_ts: now_ms,
            crossed: false,
            spread_history: RingBuffer::new(SPREAD_HISTORY_CAPACITY),
            net_flow_history: RingBuffer::new(NET_FLOW_HISTORY_CAPACITY),
            far_level_activity: HashMap::new(),
        }
    }

    /// Apply a depth batch; invalid deltas are skipped and counted
    pub fn apply_depth(&mut self, ts: i64, deltas: &[DepthDelta]) -> DepthOutcome {
        let mut applied = 0usize;
        let mut rejected = 0usize;

        // Spoofing tracking needs the pre-update mid/spread so cancels of
        // far-away levels are measured against the book they targeted.
        let far_cutoff = self.far_distance_cutoff();

        for delta in deltas {
            if delta.validate().is_err() {
                rejected += 1;
                continue;
            }
            if let Some(cutoff) = far_cutoff {
                self.track_far_level(delta, cutoff);
            }
            self.book.apply_delta(delta.side, delta.price, delta.qty);
            if !delta.qty.is_zero() {
                self.quantity_history.record(delta.qty.to_f64().unwrap_or(0.0));
            }
            applied += 1;
        }

        if applied > 0 {
            self.touch(ts);
        }
        self.crossed = self.book.is_crossed();

        DepthOutcome {
            applied,
            rejected,
            crossed: self.crossed,
        }
    }

    /// Replace the book with a fresh snapshot
    pub fn apply_book_reset(
        &mut self,
        ts: i64,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
    ) {
        self.book.reset(bids, asks);
        for &(_, qty) in bids.iter().chain(asks.iter()) {
            if !qty.is_zero() {
                self.quantity_history.record(qty.to_f64().unwrap_or(0.0));
            }
        }
        self.crossed = self.book.is_crossed();
        self.touch(ts);
    }

    /// Apply one trade tick to all rolling windows
    pub fn apply_trade(&mut self, tick: TradeTick) -> Result<(), EventError> {
        tick.validate()?;
        self.trades_10s.append(tick);
        self.trades_30s.append(tick);
        self.trades_30min.append(tick);
        self.last_trade = Some(tick);
        self.touch(tick.ts);
        Ok(())
    }

    /// Apply a 24 h ticker refresh
    pub fn apply_ticker(&mut self, ts: i64, stats: TickerStats) {
        self.ticker = stats;
        self.touch(ts);
    }

    /// Milliseconds since the last accepted event
    pub fn data_age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.last_event_ts).max(0)
    }

    fn touch(&mut self, ts: i64) {
        // Tolerate minor clock skew between streams; never move backwards.
        if ts > self.last_event_ts {
            self.last_event_ts = ts;
        }
    }

    /// `(mid, 3 × spread)` when both sides are present
    fn far_distance_cutoff(&self) -> Option<(f64, f64)> {
        let bid = self.book.best_bid()?;
        let ask = self.book.best_ask()?;
        let bid_p = bid.price_f64();
        let ask_p = ask.price_f64();
        let mid = (bid_p + ask_p) / 2.0;
        let spread = (ask_p - bid_p).max(0.0);
        Some((mid, spread * 3.0))
    }

    fn track_far_level(&mut self, delta: &DepthDelta, (mid, far): (f64, f64)) {
        if far <= 0.0 {
            return;
        }
        let price = delta.price.to_f64().unwrap_or(0.0);
        if (price - mid).abs() <= far {
            return;
        }
        if self.far_level_activity.len() >= FAR_LEVEL_TRACKING_LIMIT
            && !self.far_level_activity.contains_key(&delta.price)
        {
            return;
        }
        let entry = self.far_level_activity.entry(delta.price).or_default();
        entry.side = Some(delta.side);
        if delta.qty.is_zero() {
            entry.cancels += 1;
        } else {
            entry.updates += 1;
        }
    }

    /// Tracked far-level activity for the spoofing detector
    pub fn far_level_activity(&self) -> &HashMap<Decimal, LevelActivity> {
        &self.far_level_activity
    }

    /// Clear spoofing counters; called after each slow cycle
    pub fn reset_far_level_activity(&mut self) {
        self.far_level_activity.clear();
    }

    /// Record the fast-cycle spread sample (flash-crash baseline)
    pub fn record_spread(&mut self, ts: i64, spread_bps: f64) {
        self.spread_history.append(Sample { ts, value: spread_bps });
    }

    /// Mean of the retained spread samples, excluding the most recent
    pub fn recent_spread_average(&self) -> Option<f64> {
        let n = self.spread_history.len();
        if n < 2 {
            return None;
        }
        let sum: f64 = self
            .spread_history
            .iter()
            .take(n - 1)
            .map(|s| s.value)
            .sum();
        Some(sum / (n - 1) as f64)
    }

    /// Latest recorded spread sample
    pub fn last_spread(&self) -> Option<f64> {
        self.spread_history.last().map(|s| s.value)
    }

    /// Record the slow-cycle net-flow observation
    pub fn record_net_flow(&mut self, ts: i64, net_flow: f64) {
        self.net_flow_history.append(Sample { ts, value: net_flow });
    }

    /// Most recent `count` net-flow observations, oldest first
    pub fn net_flow_tail(&self, count: usize) -> Vec<f64> {
        let n = self.net_flow_history.len();
        self.net_flow_history
            .iter()
            .skip(n.saturating_sub(count))
            .map(|s| s.value)
            .collect()
    }
}
