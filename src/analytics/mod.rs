//! Market-quality calculators
//!
//! Fast-cycle calculators (spread, depth, flow, health) run every report
//! period; slow-cycle calculators (volume profile, walls, vacuums, anomaly
//! detectors) run on the slow scheduler. All are pure functions over a
//! read-only `SymbolState` snapshot — errors omit the affected report field
//! and never abort the rest of the report, except invariant violations which
//! abort the cycle's publish.

pub mod anomaly;
pub mod depth;
pub mod flow;
pub mod health;
pub mod liquidity;
pub mod profile;
pub mod spread;

use serde::{Deserialize, Serialize};

pub use anomaly::{detect_anomalies, Anomaly, AnomalyKind};
pub use depth::{calculate_depth, DepthMetrics};
pub use flow::{calculate_flow, FlowMetrics};
pub use health::{calculate_health, HealthComponent, HealthInputs, HealthScore};
pub use liquidity::{detect_vacuums, detect_walls, LiquidityVacuum, LiquidityWall};
pub use profile::{calculate_volume_profile, VolumeProfile};
pub use spread::{calculate_spread, round_half_even, SpreadMetrics};

/// Shared severity scale for walls, vacuums and anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}
