//! Raw event stream mirror (NT_ENABLE_STREAMS)
//!
//! When enabled, accepted market events are appended to the Redis stream
//! `nt:events:{symbol}`. Strictly fire-and-forget: a slow or unreachable
//! cache drops events and counts them; report correctness never depends on
//! this path.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::keys;
use crate::cache::pool::CachePool;
use crate::market::MarketEvent;
use crate::telemetry;

/// Pending events tolerated before dropping
const EMITTER_CHANNEL_CAPACITY: usize = 256;

/// Approximate stream length cap (XADD MAXLEN ~)
const STREAM_MAXLEN: usize = 10_000;

/// Background task mirroring one symbol's events
pub struct StreamEmitter;

impl StreamEmitter {
    /// Spawn the emitter; the returned sender accepts events to mirror
    pub fn spawn(
        pool: CachePool,
        symbol: &str,
        cancel: CancellationToken,
    ) -> mpsc::Sender<MarketEvent> {
        let (tx, mut rx) = mpsc::channel::<MarketEvent>(EMITTER_CHANNEL_CAPACITY);
        let symbol = symbol.to_string();
        let stream_key = keys::events_stream_key(&symbol);

        tokio::spawn(async move {
            debug!(symbol = %symbol, "stream emitter started");
            loop {
                let event = tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => event,
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                };

                let (kind, payload) = describe(&event);
                let mut conn = pool.connection();
                let result = pool
                    .run(async {
                        let _: String = redis::cmd("XADD")
                            .arg(&stream_key)
                            .arg("MAXLEN")
                            .arg("~")
                            .arg(STREAM_MAXLEN)
                            .arg("*")
                            .arg("kind")
                            .arg(kind)
                            .arg("ts")
                            .arg(event.ts())
                            .arg("payload")
                            .arg(&payload)
                            .query_async(&mut conn)
                            .await?;
                        Ok(())
                    })
                    .await;

                if let Err(e) = result {
                    telemetry::stream_emit_failure(&symbol);
                    warn!(symbol = %symbol, error = %e, "event mirror failed");
                }
            }
            debug!(symbol = %symbol, "stream emitter stopped");
        });

        tx
    }
}

/// Compact JSON rendering per event kind
fn describe(event: &MarketEvent) -> (&'static str, String) {
    match event {
        MarketEvent::Depth { deltas, .. } => (
            "depth",
            serde_json::json!({
                "levels": deltas.len(),
            })
            .to_string(),
        ),
        MarketEvent::BookReset { bids, asks, .. } => (
            "book_reset",
            serde_json::json!({
                "bid_levels": bids.len(),
                "ask_levels": asks.len(),
            })
            .to_string(),
        ),
        MarketEvent::Trade(tick) => (
            "trade",
            serde_json::json!({
                "price": tick.price,
                "volume": tick.volume,
                "side": tick.aggressor_side,
            })
            .to_string(),
        ),
        MarketEvent::Ticker { stats, .. } => (
            "ticker",
            serde_json::json!({
                "last_price": stats.last_price,
                "volume_24h": stats.volume_24h,
            })
            .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Side, TradeTick};

    #[test]
    fn test_describe_trade() {
        let event = MarketEvent::Trade(TradeTick {
            ts: 5,
            price: 100.5,
            volume: 2.0,
            aggressor_side: Side::Buy,
        });
        let (kind, payload) = describe(&event);
        assert_eq!(kind, "trade");
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["price"], 100.5);
        assert_eq!(value["side"], "BUY");
    }

    #[test]
    fn test_describe_depth_is_compact() {
        let event = MarketEvent::Depth {
            ts: 1,
            deltas: vec![],
        };
        let (kind, payload) = describe(&event);
        assert_eq!(kind, "depth");
        assert!(payload.len() < 64);
    }
}
