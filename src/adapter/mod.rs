//! Exchange adapter boundary
//!
//! The engine only sees the `ExchangeAdapter` trait and the tagged
//! `MarketEvent` stream; everything venue-specific (stream framing, REST
//! snapshots, sequence bookkeeping) stays behind it.

pub mod binance;

use tokio::sync::mpsc;

use crate::market::MarketEvent;

pub use binance::BinanceAdapter;

/// Push-based market data source
///
/// `subscribe` is idempotent: subscribing an already-subscribed symbol is a
/// no-op, as is unsubscribing an unknown one. Implementations must never
/// block event delivery on cache I/O.
pub trait ExchangeAdapter: Send + Sync + 'static {
    /// Start streaming `symbol` into `events`
    fn subscribe(
        &self,
        symbol: &str,
        events: mpsc::Sender<MarketEvent>,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    /// Stop streaming `symbol`
    fn unsubscribe(&self, symbol: &str) -> impl std::future::Future<Output = ()> + Send;
}
