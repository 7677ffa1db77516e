//! Market data primitives: order book, events, rolling windows, symbol state

pub mod book;
pub mod events;
pub mod ring;
pub mod state;

pub use book::{BookLevel, OrderBook, TOP_LEVELS};
pub use events::{DepthDelta, MarketEvent, Side, TickerStats, TradeTick};
pub use ring::{PercentileTracker, RingBuffer, Timestamped};
pub use state::{DepthOutcome, LevelActivity, SymbolState};
