//! Liquidity walls and vacuums (slow cycle)
//!
//! Walls are top-20 levels resting at least `max(P95 × 1.5, configured_min)`;
//! vacuums are runs of 3+ consecutive thin levels (below P10) on one side.

use crate::analytics::Severity;
use crate::error::CalcError;
use crate::market::{BookLevel, Side, SymbolState};

/// Wall threshold multiplier over P95
const WALL_P95_MULTIPLIER: f64 = 1.5;

/// Minimum run length for a vacuum
const VACUUM_MIN_RUN: usize = 3;

/// A level with anomalously high resting quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityWall {
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub severity: Severity,
}

/// A price band of anomalously thin resting quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityVacuum {
    pub side: Side,
    pub from: f64,
    pub to: f64,
    pub severity: Severity,
    /// Levels in the merged run (drives severity)
    pub run_len: usize,
}

/// Detect walls across the top-20 levels of both sides
///
/// Threshold `T = max(P95 × 1.5, configured_min)`; requires the percentile to
/// be defined (≥ 20 quantity samples).
pub fn detect_walls(
    state: &SymbolState,
    configured_min: f64,
) -> Result<Vec<LiquidityWall>, CalcError> {
    let p95 = state
        .quantity_history
        .p95()
        .ok_or_else(|| CalcError::InsufficientData("quantity history too short".into()))?;

    let threshold = (p95 * WALL_P95_MULTIPLIER).max(configured_min);
    if threshold <= 0.0 {
        return Ok(Vec::new());
    }

    let mut walls = Vec::new();
    for (side, levels) in [
        (Side::Buy, state.book.top_bids()),
        (Side::Sell, state.book.top_asks()),
    ] {
        for level in levels {
            let qty = level.qty_f64();
            if qty >= threshold {
                walls.push(LiquidityWall {
                    side,
                    price: level.price_f64(),
                    qty,
                    severity: wall_severity(qty / threshold),
                });
            }
        }
    }
    Ok(walls)
}

fn wall_severity(ratio: f64) -> Severity {
    if ratio >= 3.0 {
        Severity::High
    } else if ratio >= 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Detect vacuums across the top-20 levels of both sides
///
/// A run of 3+ consecutive levels below P10 forms a vacuum spanning the run's
/// price range. Overlapping or adjacent vacuums on the same side merge,
/// keeping the larger severity.
pub fn detect_vacuums(state: &SymbolState) -> Result<Vec<LiquidityVacuum>, CalcError> {
    let p10 = state
        .quantity_history
        .p10()
        .ok_or_else(|| CalcError::InsufficientData("quantity history too short".into()))?;

    let mut vacuums = Vec::new();
    for (side, levels) in [
        (Side::Buy, state.book.top_bids()),
        (Side::Sell, state.book.top_asks()),
    ] {
        vacuums.extend(scan_side(side, levels, p10));
    }
    Ok(vacuums)
}

fn scan_side(side: Side, levels: &[BookLevel], threshold: f64) -> Vec<LiquidityVacuum> {
    let mut found = Vec::new();
    let mut run: Vec<&BookLevel> = Vec::new();

    for level in levels {
        if level.qty_f64() < threshold {
            run.push(level);
        } else {
            flush_run(side, &mut run, &mut found);
        }
    }
    flush_run(side, &mut run, &mut found);

    merge_vacuums(found)
}

fn flush_run(side: Side, run: &mut Vec<&BookLevel>, out: &mut Vec<LiquidityVacuum>) {
    if run.len() >= VACUUM_MIN_RUN {
        let mut prices: Vec<f64> = run.iter().map(|l| l.price_f64()).collect();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.push(LiquidityVacuum {
            side,
            from: prices[0],
            to: prices[prices.len() - 1],
            severity: vacuum_severity(run.len()),
            run_len: run.len(),
        });
    }
    run.clear();
}

fn vacuum_severity(run_len: usize) -> Severity {
    if run_len >= 10 {
        Severity::High
    } else if run_len >= 6 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Merge same-side vacuums whose price ranges overlap or touch
fn merge_vacuums(mut vacuums: Vec<LiquidityVacuum>) -> Vec<LiquidityVacuum> {
    if vacuums.len() < 2 {
        return vacuums;
    }
    vacuums.sort_by(|a, b| a.from.partial_cmp(&b.from).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<LiquidityVacuum> = Vec::with_capacity(vacuums.len());
    for vacuum in vacuums {
        match merged.last_mut() {
            Some(prev) if vacuum.from <= prev.to => {
                prev.to = prev.to.max(vacuum.to);
                prev.run_len += vacuum.run_len;
                prev.severity = prev.severity.max(vacuum.severity);
            }
            _ => merged.push(vacuum),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::DepthDelta;
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

    /// State whose quantity history pins P95 ≈ `p95` and P10 ≈ `p10`
    fn state_with_history(p10: f64, p95: f64) -> SymbolState {
        let mut state = SymbolState::new("BTCUSDT", 0);
        for i in 0..100 {
            // 100 evenly spaced samples from p10-ish to p95-ish keeps both
            // percentiles near the requested values.
            let q = p10 + (p95 - p10) * (i as f64 / 99.0) / 0.85;
            state.quantity_history.record(q.max(0.001));
        }
        state
    }

    fn seed_side(state: &mut SymbolState, side: Side, quantities: &[f64]) {
        let base = match side {
            Side::Buy => 100.0,
            Side::Sell => 101.0,
        };
        let step = match side {
            Side::Buy => -0.1,
            Side::Sell => 0.1,
        };
        let deltas: Vec<DepthDelta> = quantities
            .iter()
            .enumerate()
            .map(|(i, &q)| delta(side, base + step * i as f64, q))
            .collect();
        state.apply_depth(1, &deltas);
    }

    #[test]
    fn test_walls_require_history() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        seed_side(&mut state, Side::Buy, &[100.0; 5]);
        assert!(matches!(
            detect_walls(&state, 0.0),
            Err(CalcError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_wall_threshold_and_severity_ladder() {
        let mut state = SymbolState::new("BTCUSDT", 0);
        // One level per severity bucket plus one below the threshold.
        seed_side(&mut state, Side::Buy, &[45.0, 31.0, 16.0, 10.0]);
        // Flood the history so P95 = 10.0 regardless of the seeded book
        // quantities, making the threshold exactly 15.0.
        for _ in 0..500 {
            state.quantity_history.record(10.0);
        }
        let walls = detect_walls(&state, 0.0).unwrap();
        let bid_walls: Vec<&LiquidityWall> =
            walls.iter().filter(|w| w.side == Side::Buy).collect();
        assert_eq!(bid_walls.len(), 3);
        assert_eq!(bid_walls[0].severity, Severity::High); // 45 / 15 = 3.0
        assert_eq!(bid_walls[1].severity, Severity::Medium); // 31 / 15 ≈ 2.07
        assert_eq!(bid_walls[2].severity, Severity::Low); // 16 / 15 ≈ 1.07
    }

    #[test]
    fn test_configured_min_dominates_as_low_severity() {
        // History keeps P95 tiny so the configured floor dominates; a level
        // just meeting the floor is a wall, but only Low severity.
        let mut state = state_with_history(0.01, 0.1);
        seed_side(&mut state, Side::Sell, &[5.0, 0.05, 0.05]);
        let walls = detect_walls(&state, 5.0).unwrap();
        let wall = walls.iter().find(|w| w.side == Side::Sell).unwrap();
        assert!((wall.qty - 5.0).abs() < 1e-9);
        assert_eq!(wall.severity, Severity::Low);
    }

    #[test]
    fn test_vacuum_run_of_two_not_emitted_three_is() {
        let mut state = state_with_history(1.0, 10.0);
        let p10 = state.quantity_history.p10().unwrap();
        let thin = p10 * 0.5;
        let thick = p10 * 100.0;

        // Two thin levels: no vacuum.
        seed_side(&mut state, Side::Buy, &[thick, thin, thin, thick, thick]);
        let vacuums = detect_vacuums(&state).unwrap();
        assert!(vacuums.iter().all(|v| v.side != Side::Buy));

        // Three thin levels: one vacuum, severity low.
        seed_side(&mut state, Side::Sell, &[thick, thin, thin, thin, thick]);
        let vacuums = detect_vacuums(&state).unwrap();
        let vacuum = vacuums.iter().find(|v| v.side == Side::Sell).unwrap();
        assert_eq!(vacuum.run_len, 3);
        assert_eq!(vacuum.severity, Severity::Low);
        assert!(vacuum.from < vacuum.to);
    }

    #[test]
    fn test_vacuum_severity_by_run_length() {
        assert_eq!(vacuum_severity(3), Severity::Low);
        assert_eq!(vacuum_severity(6), Severity::Medium);
        assert_eq!(vacuum_severity(10), Severity::High);
    }

    #[test]
    fn test_merge_overlapping_vacuums_keeps_max_severity() {
        let a = LiquidityVacuum {
            side: Side::Buy,
            from: 99.0,
            to: 99.5,
            severity: Severity::Low,
            run_len: 3,
        };
        let b = LiquidityVacuum {
            side: Side::Buy,
            from: 99.5,
            to: 100.2,
            severity: Severity::Medium,
            run_len: 6,
        };
        let merged = merge_vacuums(vec![b, a]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].from, 99.0);
        assert_eq!(merged[0].to, 100.2);
        assert_eq!(merged[0].severity, Severity::Medium);
    }
}
