//! Market report schema (v1.1)
//!
//! The JSON published to `report:{symbol}`. Field names are contract; the
//! envelope mixes camelCase (writer metadata) and snake_case (market fields)
//! exactly as consumers expect them.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::analytics::{Anomaly, HealthScore, Severity};
use crate::engine::ingest::IngestionStatus;

pub use builder::{build_fast_report, build_slow_fields, SlowFields};

/// Report schema version
pub const SCHEMA_VERSION: &str = "1.1";

/// Venue identifier stamped on every report
pub const VENUE: &str = "BINANCE";

/// Writer identity and fencing token at publication instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterInfo {
    #[serde(rename = "nodeId")]
    pub node_id: String,

    #[serde(rename = "writerToken")]
    pub writer_token: i64,
}

/// One price level in the report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub qty: f64,
}

/// Ingestion freshness block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionInfo {
    pub status: IngestionStatus,

    /// RFC 3339 time of the last accepted event
    pub last_update: String,
}

/// Depth section (top-20 per side, totals over all levels)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSection {
    pub bids: Vec<PricePoint>,
    pub asks: Vec<PricePoint>,
    pub total_bid_qty: f64,
    pub total_ask_qty: f64,
    pub imbalance: f64,
}

/// Flow section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSection {
    pub orders_per_sec: f64,
    pub net_flow: f64,
}

/// A wall entry in the liquidity section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallEntry {
    pub side: String,
    pub price: f64,
    pub qty: f64,
    pub severity: Severity,
}

/// A vacuum entry in the liquidity section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VacuumEntry {
    pub from: f64,
    pub to: f64,
    pub severity: Severity,
}

/// Volume profile summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfileSection {
    #[serde(rename = "POC")]
    pub poc: f64,

    #[serde(rename = "VAH")]
    pub vah: f64,

    #[serde(rename = "VAL")]
    pub val: f64,

    pub window_sec: u32,
    pub trade_count: usize,
}

/// Liquidity section (slow cycle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LiquiditySection {
    pub walls: Vec<WallEntry>,
    pub vacuums: Vec<VacuumEntry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_profile: Option<VolumeProfileSection>,
}

/// The published market report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,

    pub writer: WriterInfo,

    #[serde(rename = "updatedAt")]
    pub updated_at: i64,

    pub symbol: String,
    pub venue: String,
    pub generated_at: String,
    pub data_age_ms: i64,
    pub ingestion: IngestionInfo,

    pub last_price: f64,
    pub change_24h_pct: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_bid: Option<PricePoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_ask: Option<PricePoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_bps: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid_price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub micro_price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<DepthSection>,

    pub flow: FlowSection,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<LiquiditySection>,

    pub anomalies: Vec<Anomaly>,

    pub health: HealthScore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::HealthComponent;

    fn minimal_report() -> MarketReport {
        MarketReport {
            schema_version: SCHEMA_VERSION.to_string(),
            writer: WriterInfo {
                node_id: "node-a".into(),
                writer_token: 7,
            },
            updated_at: 1_700_000_000_000,
            symbol: "BTCUSDT".into(),
            venue: VENUE.into(),
            generated_at: "2024-01-01T00:00:00Z".into(),
            data_age_ms: 120,
            ingestion: IngestionInfo {
                status: IngestionStatus::Ok,
                last_update: "2024-01-01T00:00:00Z".into(),
            },
            last_price: 100.0,
            change_24h_pct: 1.5,
            high_24h: 101.0,
            low_24h: 98.0,
            volume_24h: 1234.0,
            best_bid: Some(PricePoint { price: 100.0, qty: 2.0 }),
            best_ask: Some(PricePoint { price: 100.1, qty: 8.0 }),
            spread_bps: Some(10.0),
            mid_price: Some(100.05),
            micro_price: Some(100.02),
            depth: None,
            flow: FlowSection {
                orders_per_sec: 0.5,
                net_flow: 2.0,
            },
            liquidity: None,
            anomalies: Vec::new(),
            health: HealthScore {
                score: 90,
                components: vec![HealthComponent {
                    metric: "spread".into(),
                    score: 98,
                }],
            },
        }
    }

    #[test]
    fn test_contract_field_names() {
        let json = serde_json::to_value(minimal_report()).unwrap();
        assert_eq!(json["schemaVersion"], "1.1");
        assert_eq!(json["writer"]["nodeId"], "node-a");
        assert_eq!(json["writer"]["writerToken"], 7);
        assert_eq!(json["updatedAt"], 1_700_000_000_000i64);
        assert_eq!(json["venue"], "BINANCE");
        assert_eq!(json["ingestion"]["status"], "ok");
        assert_eq!(json["flow"]["orders_per_sec"], 0.5);
        // Omitted calculator outputs simply do not appear.
        assert!(json.get("depth").is_none());
        assert!(json.get("liquidity").is_none());
    }

    #[test]
    fn test_volume_profile_uppercase_keys() {
        let section = VolumeProfileSection {
            poc: 100.5,
            vah: 101.0,
            val: 100.0,
            window_sec: 1800,
            trade_count: 50,
        };
        let json = serde_json::to_value(section).unwrap();
        assert_eq!(json["POC"], 100.5);
        assert_eq!(json["VAH"], 101.0);
        assert_eq!(json["VAL"], 100.0);
    }

    #[test]
    fn test_round_trip() {
        let report = minimal_report();
        let json = serde_json::to_string(&report).unwrap();
        let back: MarketReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
