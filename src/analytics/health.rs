//! Composite market health score (fast cycle)
//!
//! Weighted 0–100 score over six normalised components. Weights: spread 20 %,
//! depth 25 %, balance 15 %, flow 15 %, anomalies 15 %, freshness 10 %.
//! Component inputs that are unavailable (e.g. an empty book) score zero
//! rather than failing the report.

use serde::{Deserialize, Serialize};

use crate::analytics::{round_half_even, Anomaly, Severity};

/// Spread (bps) at or above which the spread component bottoms out
const SPREAD_FLOOR_BPS: f64 = 50.0;

/// Level count (both sides combined) for a full depth score
const DEPTH_FULL_LEVELS: usize = 40;

/// Trade rate (events/sec) for a full flow score
const FLOW_FULL_RATE: f64 = 2.0;

/// Data age bounds for the freshness ramp
const FRESH_AGE_MS: i64 = 1_000;
const STALE_AGE_MS: i64 = 5_000;

/// Inputs the health calculator consumes
///
/// `None` marks a component whose upstream calculator failed this cycle.
#[derive(Debug, Clone, Default)]
pub struct HealthInputs<'a> {
    pub spread_bps: Option<f64>,
    pub imbalance: Option<f64>,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub orders_per_sec: f64,
    pub anomalies: &'a [Anomaly],
    pub data_age_ms: i64,
}

/// One scored component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthComponent {
    pub metric: String,
    pub score: i64,
}

/// Composite health result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: i64,
    pub components: Vec<HealthComponent>,
}

/// Compute the composite health score
pub fn calculate_health(inputs: &HealthInputs) -> HealthScore {
    let spread = spread_score(inputs.spread_bps);
    let depth = depth_score(inputs.bid_levels, inputs.ask_levels);
    let balance = balance_score(inputs.imbalance);
    let flow = flow_score(inputs.orders_per_sec);
    let anomalies = anomaly_score(inputs.anomalies);
    let freshness = freshness_score(inputs.data_age_ms);

    let weighted = spread * 0.20
        + depth * 0.25
        + balance * 0.15
        + flow * 0.15
        + anomalies * 0.15
        + freshness * 0.10;

    let components = vec![
        component("spread", spread),
        component("depth", depth),
        component("balance", balance),
        component("flow", flow),
        component("anomalies", anomalies),
        component("freshness", freshness),
    ];

    HealthScore {
        score: (round_half_even(weighted, 0) as i64).clamp(0, 100),
        components,
    }
}

fn component(metric: &str, score: f64) -> HealthComponent {
    HealthComponent {
        metric: metric.to_string(),
        score: (round_half_even(score, 0) as i64).clamp(0, 100),
    }
}

/// Linear ramp: 100 at 0 bps down to 0 at 50 bps
fn spread_score(spread_bps: Option<f64>) -> f64 {
    match spread_bps {
        Some(bps) if bps.is_finite() && bps >= 0.0 => {
            (1.0 - (bps.min(SPREAD_FLOOR_BPS) / SPREAD_FLOOR_BPS)) * 100.0
        }
        _ => 0.0,
    }
}

/// Level-count ramp: full score with 20 levels resting on each side
fn depth_score(bid_levels: usize, ask_levels: usize) -> f64 {
    if bid_levels == 0 || ask_levels == 0 {
        return 0.0;
    }
    let total = (bid_levels + ask_levels).min(DEPTH_FULL_LEVELS);
    total as f64 / DEPTH_FULL_LEVELS as f64 * 100.0
}

/// 100 at perfect balance, 0 at |imbalance| = 1
fn balance_score(imbalance: Option<f64>) -> f64 {
    match imbalance {
        Some(i) if i.is_finite() => (1.0 - i.abs().min(1.0)) * 100.0,
        _ => 0.0,
    }
}

/// Trade-activity ramp: full score at 2 events/sec
fn flow_score(orders_per_sec: f64) -> f64 {
    (orders_per_sec.max(0.0) / FLOW_FULL_RATE).min(1.0) * 100.0
}

/// 100 minus a penalty per anomaly, weighted by severity
fn anomaly_score(anomalies: &[Anomaly]) -> f64 {
    let penalty: f64 = anomalies
        .iter()
        .map(|a| match a.severity {
            Severity::High => 30.0,
            Severity::Medium => 20.0,
            Severity::Low => 10.0,
        })
        .sum();
    (100.0 - penalty).max(0.0)
}

/// 100 while fresh (≤ 1 s), linear to 0 at 5 s
fn freshness_score(data_age_ms: i64) -> f64 {
    if data_age_ms <= FRESH_AGE_MS {
        return 100.0;
    }
    if data_age_ms >= STALE_AGE_MS {
        return 0.0;
    }
    let span = (STALE_AGE_MS - FRESH_AGE_MS) as f64;
    (1.0 - (data_age_ms - FRESH_AGE_MS) as f64 / span) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnomalyKind;

    fn healthy_inputs() -> HealthInputs<'static> {
        HealthInputs {
            spread_bps: Some(1.0),
            imbalance: Some(0.0),
            bid_levels: 20,
            ask_levels: 20,
            orders_per_sec: 5.0,
            anomalies: &[],
            data_age_ms: 200,
        }
    }

    #[test]
    fn test_healthy_market_scores_high() {
        let health = calculate_health(&healthy_inputs());
        assert!(health.score >= 95, "score {}", health.score);
        assert_eq!(health.components.len(), 6);
    }

    #[test]
    fn test_score_bounded() {
        let anomalies = vec![
            Anomaly {
                kind: AnomalyKind::FlashCrashRisk,
                severity: Severity::High,
                note: String::new(),
            };
            5
        ];
        let inputs = HealthInputs {
            spread_bps: Some(500.0),
            imbalance: Some(1.0),
            bid_levels: 0,
            ask_levels: 0,
            orders_per_sec: 0.0,
            anomalies: &anomalies,
            data_age_ms: 60_000,
        };
        let health = calculate_health(&inputs);
        assert_eq!(health.score, 0);
        for c in &health.components {
            assert!((0..=100).contains(&c.score));
        }
    }

    #[test]
    fn test_missing_components_score_zero_not_error() {
        let inputs = HealthInputs {
            spread_bps: None,
            imbalance: None,
            ..healthy_inputs()
        };
        let health = calculate_health(&inputs);
        let spread = health.components.iter().find(|c| c.metric == "spread").unwrap();
        assert_eq!(spread.score, 0);
        assert!((0..=100).contains(&health.score));
    }

    #[test]
    fn test_freshness_ramp() {
        assert_eq!(freshness_score(500), 100.0);
        assert_eq!(freshness_score(1_000), 100.0);
        assert!((freshness_score(3_000) - 50.0).abs() < 1e-9);
        assert_eq!(freshness_score(5_000), 0.0);
    }

    #[test]
    fn test_anomaly_penalties() {
        let anomalies = vec![
            Anomaly {
                kind: AnomalyKind::Spoofing,
                severity: Severity::Low,
                note: String::new(),
            },
            Anomaly {
                kind: AnomalyKind::Iceberg,
                severity: Severity::Medium,
                note: String::new(),
            },
        ];
        assert_eq!(anomaly_score(&anomalies), 70.0);
    }

    #[test]
    fn test_weights_sum_to_one() {
        // All components at 100 must yield exactly 100.
        let health = calculate_health(&HealthInputs {
            spread_bps: Some(0.0),
            imbalance: Some(0.0),
            bid_levels: 40,
            ask_levels: 40,
            orders_per_sec: 10.0,
            anomalies: &[],
            data_age_ms: 0,
        });
        assert_eq!(health.score, 100);
    }
}
