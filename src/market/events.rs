//! Normalised market events
//!
//! The exchange adapter converts venue payloads into the tagged `MarketEvent`
//! form at the ingress boundary; everything downstream matches on the variant
//! and never sees venue-specific framing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::market::ring::Timestamped;

/// Aggressor side of a trade / side of a book delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        match raw.to_ascii_uppercase().as_str() {
            "BUY" | "BID" => Ok(Side::Buy),
            "SELL" | "ASK" => Ok(Side::Sell),
            other => Err(EventError::UnknownSide(other.to_string())),
        }
    }
}

/// A single executed trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Trade time, epoch millis UTC
    pub ts: i64,
    pub price: f64,
    pub volume: f64,
    pub aggressor_side: Side,
}

impl TradeTick {
    /// Validate numeric fields; invalid ticks are counted, not applied
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.price.is_finite() {
            return Err(EventError::NonFinite { field: "price" });
        }
        if !self.volume.is_finite() {
            return Err(EventError::NonFinite { field: "volume" });
        }
        if self.volume < 0.0 {
            return Err(EventError::NegativeQuantity {
                price: self.price.to_string(),
                qty: self.volume.to_string(),
            });
        }
        Ok(())
    }
}

impl Timestamped for TradeTick {
    fn ts_ms(&self) -> i64 {
        self.ts
    }
}

/// One price-level change from the depth stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthDelta {
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

impl DepthDelta {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.qty.is_sign_negative() {
            return Err(EventError::NegativeQuantity {
                price: self.price.to_string(),
                qty: self.qty.to_string(),
            });
        }
        Ok(())
    }
}

/// Rolling 24 h ticker statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickerStats {
    pub last_price: f64,
    pub change_24h_pct: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
}

/// Tagged market event, one per adapter callback
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Batch of book deltas sharing one event time
    Depth { ts: i64, deltas: Vec<DepthDelta> },

    /// Full book snapshot replacing current depth (initial sync or
    /// gap-recovery resync)
    BookReset {
        ts: i64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },

    /// Executed trade
    Trade(TradeTick),

    /// 24 h rolling ticker refresh
    Ticker { ts: i64, stats: TickerStats },
}

impl MarketEvent {
    /// Event time, epoch millis UTC
    pub fn ts(&self) -> i64 {
        match self {
            MarketEvent::Depth { ts, .. } => *ts,
            MarketEvent::BookReset { ts, .. } => *ts,
            MarketEvent::Trade(tick) => tick.ts,
            MarketEvent::Ticker { ts, .. } => *ts,
        }
    }
}
