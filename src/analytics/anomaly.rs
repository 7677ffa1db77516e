//! Microstructure anomaly detection (slow cycle)
//!
//! Heuristic detectors for spoofing, iceberg orders and flash-crash risk.
//! Each emits an `Anomaly { kind, severity, note }` value object; detectors
//! are independent and a failing one never suppresses the others.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analytics::Severity;
use crate::market::SymbolState;

/// Cancel-rate threshold for spoofing
const SPOOF_CANCEL_RATE: f64 = 0.7;

/// Minimum events at a far level before its cancel rate is meaningful
const SPOOF_MIN_EVENTS: u32 = 5;

/// Minimum fills at one price for an iceberg candidate
const ICEBERG_MIN_FILLS: usize = 5;

/// Maximum relative deviation of fill sizes from their mean
const ICEBERG_MAX_DEVIATION: f64 = 0.10;

/// Iceberg lookback window
const ICEBERG_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Spread-widening multiple that counts as a flash-crash signal
const FLASH_SPREAD_MULTIPLE: f64 = 2.0;

/// Vacuum count that counts as a flash-crash signal
const FLASH_VACUUM_COUNT: usize = 3;

/// Net-flow observations examined for the decreasing-run signal
const FLASH_FLOW_OBSERVATIONS: usize = 5;

/// Detected anomaly kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Spoofing,
    Iceberg,
    FlashCrashRisk,
}

/// One detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub note: String,
}

/// Run all detectors over the snapshot
///
/// `vacuum_count` comes from the same cycle's vacuum scan so the flash-crash
/// detector sees consistent data.
pub fn detect_anomalies(
    state: &SymbolState,
    now_ms: i64,
    vacuum_count: usize,
    net_flow_threshold: f64,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    if let Some(a) = detect_spoofing(state) {
        anomalies.push(a);
    }
    anomalies.extend(detect_icebergs(state, now_ms));
    if let Some(a) = detect_flash_crash_risk(state, vacuum_count, net_flow_threshold) {
        anomalies.push(a);
    }
    anomalies
}

/// Spoofing: far-from-mid levels that are mostly cancelled
///
/// Levels further than 3× spread from the mid are tracked by the symbol
/// state; a level with `cancels / (cancels + updates) ≥ 0.7` over at least 5
/// events is suspect. Severity scales with both the worst rate and how many
/// levels offend.
pub fn detect_spoofing(state: &SymbolState) -> Option<Anomaly> {
    let mut offenders = 0usize;
    let mut worst_rate = 0.0f64;

    for activity in state.far_level_activity().values() {
        if activity.cancels + activity.updates < SPOOF_MIN_EVENTS {
            continue;
        }
        let rate = activity.cancel_rate();
        if rate >= SPOOF_CANCEL_RATE {
            offenders += 1;
            worst_rate = worst_rate.max(rate);
        }
    }

    if offenders == 0 {
        return None;
    }

    let severity = if worst_rate >= 0.9 && offenders >= 3 {
        Severity::High
    } else if worst_rate >= 0.8 || offenders >= 2 {
        Severity::Medium
    } else {
        Severity::Low
    };

    Some(Anomaly {
        kind: AnomalyKind::Spoofing,
        severity,
        note: format!(
            "{offenders} far level(s) cancelled at rate >= {SPOOF_CANCEL_RATE} (worst {worst_rate:.2})"
        ),
    })
}

/// Iceberg: repeated same-size fills at one price
///
/// At least 5 fills at the same price within the last 5 minutes whose sizes
/// deviate no more than 10 % from their mean suggest a hidden refilling
/// order.
pub fn detect_icebergs(state: &SymbolState, now_ms: i64) -> Vec<Anomaly> {
    let mut fills_by_price: HashMap<u64, Vec<f64>> = HashMap::new();
    for trade in state.trades_30min.filter_since(now_ms - ICEBERG_WINDOW_MS) {
        fills_by_price
            .entry(trade.price.to_bits())
            .or_default()
            .push(trade.volume);
    }

    let mut anomalies = Vec::new();
    for (price_bits, volumes) in fills_by_price {
        if volumes.len() < ICEBERG_MIN_FILLS {
            continue;
        }
        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        if mean <= 0.0 {
            continue;
        }
        let max_deviation = volumes
            .iter()
            .map(|v| (v - mean).abs() / mean)
            .fold(0.0f64, f64::max);
        if max_deviation > ICEBERG_MAX_DEVIATION {
            continue;
        }

        let severity = if volumes.len() >= 15 {
            Severity::High
        } else if volumes.len() >= 10 {
            Severity::Medium
        } else {
            Severity::Low
        };
        anomalies.push(Anomaly {
            kind: AnomalyKind::Iceberg,
            severity,
            note: format!(
                "{} uniform fills at {} within 5m (deviation {:.1}%)",
                volumes.len(),
                f64::from_bits(price_bits),
                max_deviation * 100.0
            ),
        });
    }

    // Deterministic output order regardless of map iteration.
    anomalies.sort_by(|a, b| a.note.cmp(&b.note));
    anomalies
}

/// Flash-crash risk: at least two concurrent stress signals
///
/// Signals: spread at 2× its recent average, 3+ vacuums, and a strictly
/// decreasing negative net-flow run over the last 5 observations ending
/// below the configured threshold.
pub fn detect_flash_crash_risk(
    state: &SymbolState,
    vacuum_count: usize,
    net_flow_threshold: f64,
) -> Option<Anomaly> {
    let mut signals = Vec::new();

    if let (Some(last), Some(avg)) = (state.last_spread(), state.recent_spread_average()) {
        if avg > 0.0 && last >= avg * FLASH_SPREAD_MULTIPLE {
            signals.push(format!("spread {last:.2}bps vs avg {avg:.2}bps"));
        }
    }

    if vacuum_count >= FLASH_VACUUM_COUNT {
        signals.push(format!("{vacuum_count} liquidity vacuums"));
    }

    let flows = state.net_flow_tail(FLASH_FLOW_OBSERVATIONS);
    if flows.len() == FLASH_FLOW_OBSERVATIONS
        && flows.iter().all(|v| *v < 0.0)
        && flows.windows(2).all(|w| w[1] < w[0])
        && flows[flows.len() - 1] < net_flow_threshold
    {
        signals.push(format!("net flow sliding to {:.2}", flows[flows.len() - 1]));
    }

    if signals.len() < 2 {
        return None;
    }

    let severity = if signals.len() >= 3 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(Anomaly {
        kind: AnomalyKind::FlashCrashRisk,
        severity,
        note: signals.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{DepthDelta, Side, TradeTick};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    fn delta(side: Side, price: f64, qty: f64) -> DepthDelta {
        DepthDelta {
            side,
            price: dec(price),
            qty: dec(qty),
        }
    }

    fn trade(ts: i64, price: f64, volume: f64) -> TradeTick {
        TradeTick {
            ts,
            price,
            volume,
            aggressor_side: Side::Sell,
        }
    }

    fn spoofy_state() -> SymbolState {
        let mut state = SymbolState::new("BTCUSDT", 0);
        state.apply_depth(
            1,
            &[delta(Side::Buy, 100.0, 1.0), delta(Side::Sell, 100.1, 1.0)],
        );
        // Far bid placed once then cancelled four times (replays included):
        // 1 update, 4 cancels, rate 0.8 over 5 events.
        state.apply_depth(2, &[delta(Side::Buy, 95.0, 40.0)]);
        for i in 0..4 {
            state.apply_depth(3 + i, &[delta(Side::Buy, 95.0, 0.0)]);
        }
        state
    }

    #[test]
    fn test_spoofing_fires_on_high_cancel_rate() {
        let state = spoofy_state();
        let anomaly = detect_spoofing(&state).expect("spoofing detected");
        assert_eq!(anomaly.kind, AnomalyKind::Spoofing);
    }

    #[test]
    fn test_spoofing_needs_minimum_events() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        state.apply_depth(
            1,
            &[delta(Side::Buy, 100.0, 1.0), delta(Side::Sell, 100.1, 1.0)],
        );
        // One placement, one cancel: rate 0.5 over 2 events, under both bars.
        state.apply_depth(2, &[delta(Side::Buy, 95.0, 40.0)]);
        state.apply_depth(3, &[delta(Side::Buy, 95.0, 0.0)]);
        assert!(detect_spoofing(&state).is_none());
    }

    #[test]
    fn test_iceberg_uniform_fills() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        let now = 1_000_000;
        for i in 0..6 {
            state
                .apply_trade(trade(now - 60_000 + i * 1_000, 100.5, 2.0))
                .unwrap();
        }
        let anomalies = detect_icebergs(&state, now);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::Iceberg);
        assert_eq!(anomalies[0].severity, Severity::Low);
    }

    #[test]
    fn test_iceberg_rejects_varied_fills() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        let now = 1_000_000;
        for (i, volume) in [2.0, 2.0, 2.0, 5.0, 2.0, 2.0].iter().enumerate() {
            state
                .apply_trade(trade(now - 60_000 + i as i64 * 1_000, 100.5, *volume))
                .unwrap();
        }
        assert!(detect_icebergs(&state, now).is_empty());
    }

    #[test]
    fn test_iceberg_ignores_stale_fills() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        let now = 1_000_000;
        for i in 0..6 {
            // All fills outside the 5 minute window.
            state
                .apply_trade(trade(now - ICEBERG_WINDOW_MS - 10_000 + i, 100.5, 2.0))
                .unwrap();
        }
        assert!(detect_icebergs(&state, now).is_empty());
    }

    #[test]
    fn test_flash_crash_requires_two_signals() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        // Spread widening alone is not enough.
        for ts in 0..10 {
            state.record_spread(ts, 10.0);
        }
        state.record_spread(10, 40.0);
        assert!(detect_flash_crash_risk(&state, 0, 0.0).is_none());

        // Spread widening + vacuum pile-up fires at medium.
        let anomaly = detect_flash_crash_risk(&state, 3, 0.0).expect("risk detected");
        assert_eq!(anomaly.kind, AnomalyKind::FlashCrashRisk);
        assert_eq!(anomaly.severity, Severity::Medium);
    }

    #[test]
    fn test_flash_crash_all_three_signals_high() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        for ts in 0..10 {
            state.record_spread(ts, 10.0);
        }
        state.record_spread(10, 40.0);
        for (i, flow) in [-1.0, -2.0, -3.0, -4.0, -5.0].iter().enumerate() {
            state.record_net_flow(i as i64, *flow);
        }
        let anomaly = detect_flash_crash_risk(&state, 4, 0.0).expect("risk detected");
        assert_eq!(anomaly.severity, Severity::High);
    }

    #[test]
    fn test_flash_crash_flow_run_must_be_strictly_decreasing() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        for (i, flow) in [-1.0, -2.0, -2.0, -4.0, -5.0].iter().enumerate() {
            state.record_net_flow(i as i64, *flow);
        }
        // Plateau breaks the run, so at most the vacuum signal remains and
        // one signal is never enough.
        assert!(detect_flash_crash_risk(&state, 3, 0.0).is_none());
        assert!(detect_flash_crash_risk(&state, 0, 0.0).is_none());
    }
}
