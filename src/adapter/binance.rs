//! Binance spot market data adapter
//!
//! One WebSocket per symbol over the combined stream endpoint
//! (`<sym>@depth@100ms` / `<sym>@aggTrade` / `<sym>@ticker`), seeded with a
//! REST depth snapshot. Depth updates are sequence-validated; a gap forces a
//! snapshot resync instead of silently corrupting the book. Disconnects
//! reconnect with exponential backoff.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::ExchangeAdapter;
use crate::market::{DepthDelta, MarketEvent, Side, TickerStats, TradeTick};
use crate::telemetry;

/// Reconnect backoff ceiling
const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Depth levels requested in the REST snapshot
const SNAPSHOT_DEPTH: u32 = 100;

/// Combined-stream envelope
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    stream: String,
    data: serde_json::Value,
}

/// `<symbol>@depth@100ms` payload
#[derive(Debug, Deserialize)]
struct DepthUpdateEvent {
    #[serde(rename = "E")]
    event_time: i64,

    #[serde(rename = "U")]
    first_update_id: i64,

    #[serde(rename = "u")]
    final_update_id: i64,

    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,

    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

/// `<symbol>@aggTrade` payload
#[derive(Debug, Deserialize)]
struct AggTradeEvent {
    #[serde(rename = "T")]
    trade_time: i64,

    #[serde(rename = "p")]
    price: String,

    #[serde(rename = "q")]
    quantity: String,

    /// Buyer is maker: the aggressor sold
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// `<symbol>@ticker` payload (24 h rolling stats)
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time: i64,

    #[serde(rename = "c")]
    last_price: String,

    #[serde(rename = "P")]
    change_pct: String,

    #[serde(rename = "h")]
    high: String,

    #[serde(rename = "l")]
    low: String,

    #[serde(rename = "v")]
    volume: String,
}

/// REST depth snapshot
#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,

    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// Binance market data adapter
pub struct BinanceAdapter {
    rest_url: String,
    ws_url: String,
    http: reqwest::Client,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl BinanceAdapter {
    pub fn new(rest_url: &str, ws_url: &str) -> Self {
        Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl ExchangeAdapter for BinanceAdapter {
    async fn subscribe(&self, symbol: &str, events: mpsc::Sender<MarketEvent>) -> anyhow::Result<()> {
        let symbol = symbol.to_uppercase();
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(&symbol) {
            debug!(symbol = %symbol, "already subscribed");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        subscriptions.insert(symbol.clone(), cancel.clone());
        drop(subscriptions);

        let stream = SymbolStream {
            symbol: symbol.clone(),
            rest_url: self.rest_url.clone(),
            ws_url: self.ws_url.clone(),
            http: self.http.clone(),
            events,
        };
        tokio::spawn(stream.run(cancel));

        info!(symbol = %symbol, "subscribed to market data streams");
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        if let Some(cancel) = self.subscriptions.lock().await.remove(&symbol) {
            cancel.cancel();
            info!(symbol = %symbol, "unsubscribed from market data streams");
        }
    }
}

/// One symbol's streaming task
struct SymbolStream {
    symbol: String,
    rest_url: String,
    ws_url: String,
    http: reqwest::Client,
    events: mpsc::Sender<MarketEvent>,
}

impl SymbolStream {
    async fn run(self, cancel: CancellationToken) {
        let mut retry_count = 0u32;
        loop {
            let session = tokio::select! {
                result = self.connect_and_process() => result,
                _ = cancel.cancelled() => break,
            };

            match session {
                SessionEnd::ReceiverDropped => break,
                SessionEnd::Resync => {
                    // Gap detected; reconnect immediately for a fresh
                    // snapshot + stream pairing.
                    telemetry::ws_resubscribe("gap");
                    retry_count = 0;
                }
                SessionEnd::Failed(e) => {
                    let delay_secs =
                        std::cmp::min(2u64.saturating_pow(retry_count), MAX_RECONNECT_DELAY_SECS);
                    warn!(
                        symbol = %self.symbol,
                        error = %e,
                        retry_count,
                        delay_secs,
                        "stream failed, reconnecting with backoff"
                    );
                    telemetry::ws_resubscribe("disconnect");
                    retry_count = retry_count.saturating_add(1);

                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!(symbol = %self.symbol, "stream task exiting");
    }

    async fn connect_and_process(&self) -> SessionEnd {
        let lower = self.symbol.to_lowercase();
        let url = format!(
            "{}/stream?streams={lower}@depth@100ms/{lower}@aggTrade/{lower}@ticker",
            self.ws_url
        );

        info!(symbol = %self.symbol, url = %url, "connecting to market data streams");
        let (ws_stream, _) = match connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };
        let (mut write, mut read) = ws_stream.split();

        // Seed the book after the stream is open so no update is missed
        // between snapshot and first delta.
        let mut last_update_id = match self.send_snapshot().await {
            Ok(id) => id,
            Err(e) => return SessionEnd::Failed(e),
        };

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    match self.handle_payload(&text, &mut last_update_id).await {
                        PayloadOutcome::Continue => {}
                        PayloadOutcome::Resync => return SessionEnd::Resync,
                        PayloadOutcome::ReceiverDropped => return SessionEnd::ReceiverDropped,
                    }
                }
                Ok(Message::Ping(data)) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        return SessionEnd::Failed("pong send failed".into());
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(symbol = %self.symbol, frame = ?frame, "close frame received");
                    break;
                }
                Ok(_) => {}
                Err(e) => return SessionEnd::Failed(e.to_string()),
            }
        }

        SessionEnd::Failed("stream ended".into())
    }

    /// Fetch the REST snapshot and emit a book reset
    async fn send_snapshot(&self) -> Result<i64, String> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={SNAPSHOT_DEPTH}",
            self.rest_url, self.symbol
        );
        let snapshot: DepthSnapshot = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let bids = parse_levels(&snapshot.bids);
        let asks = parse_levels(&snapshot.asks);
        debug!(
            symbol = %self.symbol,
            update_id = snapshot.last_update_id,
            bid_levels = bids.len(),
            ask_levels = asks.len(),
            "book snapshot fetched"
        );

        self.events
            .send(MarketEvent::BookReset {
                ts: chrono::Utc::now().timestamp_millis(),
                bids,
                asks,
            })
            .await
            .map_err(|_| "event receiver dropped".to_string())?;

        Ok(snapshot.last_update_id)
    }

    async fn handle_payload(&self, text: &str, last_update_id: &mut i64) -> PayloadOutcome {
        let envelope: StreamEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "unparseable stream payload");
                return PayloadOutcome::Continue;
            }
        };

        let event = if envelope.stream.ends_with("@aggTrade") {
            parse_agg_trade(&envelope.data)
        } else if envelope.stream.ends_with("@ticker") {
            parse_ticker(&envelope.data)
        } else if envelope.stream.contains("@depth") {
            match self.normalise_depth(&envelope.data, last_update_id) {
                DepthOutcome::Apply(event) => Some(event),
                DepthOutcome::Skip => None,
                DepthOutcome::Gap => return PayloadOutcome::Resync,
            }
        } else {
            None
        };

        if let Some(event) = event {
            if self.events.send(event).await.is_err() {
                return PayloadOutcome::ReceiverDropped;
            }
        }
        PayloadOutcome::Continue
    }

    /// Validate the Binance depth sequence and normalise into deltas
    ///
    /// Stale events (`u` ≤ last id) are dropped; a gap (`U` > last id + 1)
    /// demands a resync.
    fn normalise_depth(
        &self,
        data: &serde_json::Value,
        last_update_id: &mut i64,
    ) -> DepthOutcome {
        let update: DepthUpdateEvent = match serde_json::from_value(data.clone()) {
            Ok(update) => update,
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "unparseable depth update");
                return DepthOutcome::Skip;
            }
        };

        if update.final_update_id <= *last_update_id {
            return DepthOutcome::Skip;
        }
        if update.first_update_id > *last_update_id + 1 {
            error!(
                symbol = %self.symbol,
                expected = *last_update_id + 1,
                received = update.first_update_id,
                "gap in depth updates, resync required"
            );
            return DepthOutcome::Gap;
        }

        let mut deltas = Vec::with_capacity(update.bids.len() + update.asks.len());
        collect_deltas(&mut deltas, Side::Buy, &update.bids);
        collect_deltas(&mut deltas, Side::Sell, &update.asks);

        *last_update_id = update.final_update_id;
        DepthOutcome::Apply(MarketEvent::Depth {
            ts: update.event_time,
            deltas,
        })
    }
}

enum SessionEnd {
    Failed(String),
    Resync,
    ReceiverDropped,
}

enum PayloadOutcome {
    Continue,
    Resync,
    ReceiverDropped,
}

enum DepthOutcome {
    Apply(MarketEvent),
    Skip,
    Gap,
}

fn parse_levels(raw: &[[String; 2]]) -> Vec<(Decimal, Decimal)> {
    raw.iter()
        .filter_map(|[price, qty]| {
            Some((Decimal::from_str(price).ok()?, Decimal::from_str(qty).ok()?))
        })
        .collect()
}

fn collect_deltas(out: &mut Vec<DepthDelta>, side: Side, raw: &[[String; 2]]) {
    for [price, qty] in raw {
        if let (Ok(price), Ok(qty)) = (Decimal::from_str(price), Decimal::from_str(qty)) {
            out.push(DepthDelta { side, price, qty });
        }
    }
}

fn parse_agg_trade(data: &serde_json::Value) -> Option<MarketEvent> {
    let event: AggTradeEvent = serde_json::from_value(data.clone()).ok()?;
    Some(MarketEvent::Trade(TradeTick {
        ts: event.trade_time,
        price: event.price.parse().ok()?,
        volume: event.quantity.parse().ok()?,
        aggressor_side: if event.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        },
    }))
}

fn parse_ticker(data: &serde_json::Value) -> Option<MarketEvent> {
    let event: TickerEvent = serde_json::from_value(data.clone()).ok()?;
    Some(MarketEvent::Ticker {
        ts: event.event_time,
        stats: TickerStats {
            last_price: event.last_price.parse().ok()?,
            change_24h_pct: event.change_pct.parse().ok()?,
            high_24h: event.high.parse().ok()?,
            low_24h: event.low.parse().ok()?,
            volume_24h: event.volume.parse().ok()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_trade_normalisation() {
        let data = serde_json::json!({
            "e": "aggTrade", "E": 1699999999123i64, "s": "BTCUSDT",
            "a": 1, "p": "67650.00", "q": "1.234",
            "f": 1, "l": 1, "T": 1699999999100i64, "m": true, "M": true
        });
        let event = parse_agg_trade(&data).unwrap();
        let MarketEvent::Trade(tick) = event else {
            panic!("expected trade");
        };
        assert_eq!(tick.ts, 1699999999100);
        assert_eq!(tick.price, 67650.0);
        assert_eq!(tick.volume, 1.234);
        // Buyer was maker, so the seller crossed the spread.
        assert_eq!(tick.aggressor_side, Side::Sell);
    }

    #[test]
    fn test_ticker_normalisation() {
        let data = serde_json::json!({
            "e": "24hrTicker", "E": 1699999999123i64, "s": "BTCUSDT",
            "c": "67650.00", "P": "-1.25", "h": "69000.00",
            "l": "66000.00", "v": "12345.678"
        });
        let event = parse_ticker(&data).unwrap();
        let MarketEvent::Ticker { ts, stats } = event else {
            panic!("expected ticker");
        };
        assert_eq!(ts, 1699999999123);
        assert_eq!(stats.last_price, 67650.0);
        assert_eq!(stats.change_24h_pct, -1.25);
        assert_eq!(stats.volume_24h, 12345.678);
    }

    #[test]
    fn test_depth_levels_parse() {
        let raw = [
            ["100.50".to_string(), "2.000".to_string()],
            ["bogus".to_string(), "1.0".to_string()],
        ];
        let levels = parse_levels(&raw);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].0, Decimal::from_str("100.50").unwrap());
    }

    #[test]
    fn test_depth_sequence_validation() {
        let stream = SymbolStream {
            symbol: "BTCUSDT".into(),
            rest_url: String::new(),
            ws_url: String::new(),
            http: reqwest::Client::new(),
            events: tokio::sync::mpsc::channel(1).0,
        };

        let update = |first: i64, last: i64| {
            serde_json::json!({
                "e": "depthUpdate", "E": 1i64, "s": "BTCUSDT",
                "U": first, "u": last,
                "b": [["100.0", "1.0"]], "a": []
            })
        };

        // Normal continuation applies and advances the cursor.
        let mut cursor = 100i64;
        assert!(matches!(
            stream.normalise_depth(&update(101, 105), &mut cursor),
            DepthOutcome::Apply(_)
        ));
        assert_eq!(cursor, 105);

        // Stale event is skipped without moving the cursor.
        assert!(matches!(
            stream.normalise_depth(&update(90, 105), &mut cursor),
            DepthOutcome::Skip
        ));
        assert_eq!(cursor, 105);

        // Overlapping event (U <= cursor + 1 <= u) applies.
        assert!(matches!(
            stream.normalise_depth(&update(104, 110), &mut cursor),
            DepthOutcome::Apply(_)
        ));
        assert_eq!(cursor, 110);

        // A gap demands resync.
        assert!(matches!(
            stream.normalise_depth(&update(115, 120), &mut cursor),
            DepthOutcome::Gap
        ));
    }
}
