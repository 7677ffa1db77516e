//! Report assembly
//!
//! Builds the fast-cycle report from a state snapshot and merges slow-cycle
//! fields into a previously published document. Calculator failures omit
//! their field and are logged; only invariant violations abort a cycle.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::warn;

use crate::analytics::{
    calculate_depth, calculate_flow, calculate_health, calculate_spread, calculate_volume_profile,
    detect_anomalies, detect_vacuums, detect_walls, Anomaly, HealthInputs,
};
use crate::error::CalcError;
use crate::engine::ingest::IngestionStatus;
use crate::market::{Side, SymbolState};
use crate::report::{
    DepthSection, FlowSection, IngestionInfo, LiquiditySection, MarketReport, PricePoint,
    VacuumEntry, VolumeProfileSection, WallEntry, WriterInfo, SCHEMA_VERSION, VENUE,
};

/// Tunables the builders need from configuration
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub profile_bin_size: f64,
    pub profile_window_sec: u32,
    pub wall_min_qty: f64,
    pub flash_net_flow_threshold: f64,
}

/// Slow-cycle output merged into the cached report
#[derive(Debug, Clone, PartialEq)]
pub struct SlowFields {
    pub liquidity: LiquiditySection,
    pub anomalies: Vec<Anomaly>,
}

/// Build the fast-cycle report from a state snapshot
///
/// `status` already accounts for crossed-book degradation; `token` is the
/// fencing token captured at cycle start. `slow` carries the most recent
/// slow-cycle output so a full-replacement fast write does not wipe the
/// liquidity and anomaly sections.
pub fn build_fast_report(
    state: &SymbolState,
    now_ms: i64,
    node_id: &str,
    token: i64,
    status: IngestionStatus,
    slow: Option<&SlowFields>,
) -> MarketReport {
    let spread = match calculate_spread(&state.book) {
        Ok(m) => Some(m),
        Err(e) => {
            log_omission(&state.symbol, "spread", &e);
            None
        }
    };

    let depth = match calculate_depth(&state.book) {
        Ok(m) => Some(m),
        Err(e) => {
            log_omission(&state.symbol, "depth", &e);
            None
        }
    };

    let flow = calculate_flow(state, now_ms);
    let data_age_ms = state.data_age_ms(now_ms);

    let anomalies: &[Anomaly] = slow.map(|s| s.anomalies.as_slice()).unwrap_or(&[]);
    let health = calculate_health(&HealthInputs {
        spread_bps: spread.map(|s| s.spread_bps),
        imbalance: depth.as_ref().map(|d| d.imbalance),
        bid_levels: state.book.depth(Side::Buy),
        ask_levels: state.book.depth(Side::Sell),
        orders_per_sec: flow.orders_per_sec,
        anomalies,
        data_age_ms,
    });

    MarketReport {
        schema_version: SCHEMA_VERSION.to_string(),
        writer: WriterInfo {
            node_id: node_id.to_string(),
            writer_token: token,
        },
        updated_at: now_ms,
        symbol: state.symbol.clone(),
        venue: VENUE.to_string(),
        generated_at: rfc3339(now_ms),
        data_age_ms,
        ingestion: IngestionInfo {
            status,
            last_update: rfc3339(state.last_event_ts),
        },
        last_price: state.ticker.last_price,
        change_24h_pct: state.ticker.change_24h_pct,
        high_24h: state.ticker.high_24h,
        low_24h: state.ticker.low_24h,
        volume_24h: state.ticker.volume_24h,
        best_bid: state.book.best_bid().map(|l| PricePoint {
            price: l.price_f64(),
            qty: l.qty_f64(),
        }),
        best_ask: state.book.best_ask().map(|l| PricePoint {
            price: l.price_f64(),
            qty: l.qty_f64(),
        }),
        spread_bps: spread.map(|s| s.spread_bps),
        mid_price: spread.map(|s| s.mid_price),
        micro_price: spread.map(|s| s.micro_price),
        depth: depth.map(|d| DepthSection {
            bids: d.bids.iter().map(level_point).collect(),
            asks: d.asks.iter().map(level_point).collect(),
            total_bid_qty: d.total_bid_qty,
            total_ask_qty: d.total_ask_qty,
            imbalance: d.imbalance,
        }),
        flow: FlowSection {
            orders_per_sec: flow.orders_per_sec,
            net_flow: flow.net_flow,
        },
        liquidity: slow.map(|s| s.liquidity.clone()),
        anomalies: anomalies.to_vec(),
        health,
    }
}

/// Run the slow-cycle calculators
///
/// Returns `Err` only on an invariant violation, which must abort the
/// cycle's publish entirely.
pub fn build_slow_fields(
    state: &SymbolState,
    now_ms: i64,
    params: &BuildParams,
) -> Result<SlowFields, CalcError> {
    let walls = match detect_walls(state, params.wall_min_qty) {
        Ok(walls) => walls,
        Err(e) => {
            log_omission(&state.symbol, "walls", &e);
            Vec::new()
        }
    };

    let vacuums = match detect_vacuums(state) {
        Ok(vacuums) => vacuums,
        Err(e) => {
            log_omission(&state.symbol, "vacuums", &e);
            Vec::new()
        }
    };

    let window_ms = i64::from(params.profile_window_sec) * 1_000;
    let trades: Vec<_> = state.trades_30min.filter_since(now_ms - window_ms).collect();
    let profile = match calculate_volume_profile(
        &trades,
        params.profile_bin_size,
        params.profile_window_sec,
    ) {
        Ok(profile) => profile,
        Err(e @ CalcError::InvariantViolation(_)) => return Err(e),
        Err(e) => {
            log_omission(&state.symbol, "volume_profile", &e);
            None
        }
    };

    let anomalies = detect_anomalies(
        state,
        now_ms,
        vacuums.len(),
        params.flash_net_flow_threshold,
    );

    Ok(SlowFields {
        liquidity: LiquiditySection {
            walls: walls
                .iter()
                .map(|w| WallEntry {
                    side: side_label(w.side).to_string(),
                    price: w.price,
                    qty: w.qty,
                    severity: w.severity,
                })
                .collect(),
            vacuums: vacuums
                .iter()
                .map(|v| VacuumEntry {
                    from: v.from,
                    to: v.to,
                    severity: v.severity,
                })
                .collect(),
            volume_profile: profile.map(|p| VolumeProfileSection {
                poc: p.poc,
                vah: p.vah,
                val: p.val,
                window_sec: p.window_sec,
                trade_count: p.trade_count,
            }),
        },
        anomalies,
    })
}

/// Merge slow fields into a cached report document
///
/// Only the slow-owned fields are replaced; everything the fast cycle wrote
/// stays untouched.
pub fn merge_slow_into(mut cached: Value, slow: &SlowFields) -> Result<Value, serde_json::Error> {
    if let Value::Object(ref mut map) = cached {
        map.insert("liquidity".into(), serde_json::to_value(&slow.liquidity)?);
        map.insert("anomalies".into(), serde_json::to_value(&slow.anomalies)?);
    }
    Ok(cached)
}

fn level_point(level: &crate::market::BookLevel) -> PricePoint {
    PricePoint {
        price: level.price_f64(),
        qty: level.qty_f64(),
    }
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::Buy => "bid",
        Side::Sell => "ask",
    }
}

fn rfc3339(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn log_omission(symbol: &str, metric: &str, error: &CalcError) {
    warn!(symbol = %symbol, metric = %metric, error = %error, "calculator failed, omitting field");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{DepthDelta, TradeTick};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn params() -> BuildParams {
        BuildParams {
            profile_bin_size: 0.05,
            profile_window_sec: 1_800,
            wall_min_qty: 0.0,
            flash_net_flow_threshold: 0.0,
        }
    }

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    fn seeded_state(now: i64) -> SymbolState {
        let mut state = SymbolState::new("BTCUSDT", 0);
        state.apply_depth(
            now,
            &[
                DepthDelta { side: Side::Buy, price: dec(100.00), qty: dec(2.0) },
                DepthDelta { side: Side::Sell, price: dec(100.10), qty: dec(8.0) },
            ],
        );
        state
    }

    #[test]
    fn test_fast_report_full_book() {
        let now = 1_700_000_000_000;
        let state = seeded_state(now);
        let report = build_fast_report(&state, now, "node-a", 7, IngestionStatus::Ok, None);

        assert_eq!(report.schema_version, "1.1");
        assert_eq!(report.writer.writer_token, 7);
        assert_eq!(report.spread_bps, Some(10.0));
        assert_eq!(report.mid_price, Some(100.05));
        assert_eq!(report.micro_price, Some(100.02));
        assert_eq!(report.data_age_ms, 0);
        let depth = report.depth.as_ref().unwrap();
        assert!((depth.imbalance - (-0.6)).abs() < 1e-9);
        assert!(report.best_bid.unwrap().price < report.best_ask.unwrap().price);
    }

    #[test]
    fn test_fast_report_empty_book_omits_fields() {
        let now = 1_700_000_000_000;
        let state = SymbolState::new("BTCUSDT", now);
        let report = build_fast_report(&state, now, "node-a", 1, IngestionStatus::Ok, None);

        assert!(report.spread_bps.is_none());
        assert!(report.depth.is_none());
        assert!(report.best_bid.is_none());
        // The report still publishes with flow and health present.
        assert_eq!(report.flow.orders_per_sec, 0.0);
        assert!((0..=100).contains(&report.health.score));
    }

    #[test]
    fn test_slow_fields_with_thin_history_omit_cleanly() {
        let now = 1_700_000_000_000;
        let state = seeded_state(now);
        let slow = build_slow_fields(&state, now, &params()).unwrap();
        assert!(slow.liquidity.walls.is_empty());
        assert!(slow.liquidity.volume_profile.is_none());
        assert!(slow.anomalies.is_empty());
    }

    #[test]
    fn test_slow_fields_profile_present_with_trades() {
        let now = 1_700_000_000_000;
        let mut state = seeded_state(now);
        for i in 0..50 {
            state
                .apply_trade(TradeTick {
                    ts: now - 60_000 + i * 1_000,
                    price: 100.0 + (i % 10) as f64 * 0.01,
                    volume: 1.0,
                    aggressor_side: Side::Buy,
                })
                .unwrap();
        }
        let slow = build_slow_fields(&state, now, &params()).unwrap();
        let profile = slow.liquidity.volume_profile.unwrap();
        assert!(profile.val <= profile.poc && profile.poc <= profile.vah);
        assert_eq!(profile.trade_count, 50);
    }

    #[test]
    fn test_merge_preserves_fast_fields() {
        let now = 1_700_000_000_000;
        let state = seeded_state(now);
        let report = build_fast_report(&state, now, "node-a", 7, IngestionStatus::Ok, None);
        let cached = serde_json::to_value(&report).unwrap();

        let slow = SlowFields {
            liquidity: LiquiditySection::default(),
            anomalies: vec![],
        };
        let merged = merge_slow_into(cached.clone(), &slow).unwrap();

        assert_eq!(merged["spread_bps"], cached["spread_bps"]);
        assert_eq!(merged["updatedAt"], cached["updatedAt"]);
        assert_eq!(merged["writer"], cached["writer"]);
        assert!(merged.get("liquidity").is_some());
    }
}
