//! Metric names and emit helpers
//!
//! The metric names are a stable contract with the monitoring stack; emit
//! sites go through these helpers so the names live in exactly one place.

use metrics::{counter, gauge, histogram};

pub const NODE_HEARTBEAT: &str = "nt_node_heartbeat";
pub const SYMBOLS_ASSIGNED: &str = "nt_symbols_assigned";
pub const CALC_LATENCY_MS: &str = "nt_calc_latency_ms";
pub const REPORT_PUBLISH_TOTAL: &str = "nt_report_publish_total";
pub const DATA_AGE_MS: &str = "nt_data_age_ms";
pub const LEASE_CONFLICTS_TOTAL: &str = "nt_lease_conflicts_total";
pub const HRW_REBALANCES_TOTAL: &str = "nt_hrw_rebalances_total";
pub const WS_RESUBSCRIBE_TOTAL: &str = "nt_ws_resubscribe_total";
pub const INVALID_EVENTS_TOTAL: &str = "nt_invalid_events_total";
pub const SKIPPED_CYCLES_TOTAL: &str = "nt_skipped_cycles_total";
pub const STREAM_EMIT_FAILURES_TOTAL: &str = "nt_stream_emit_failures_total";

pub fn heartbeat(node: &str) {
    counter!(NODE_HEARTBEAT, 1, "node" => node.to_string());
}

pub fn symbols_assigned(node: &str, count: usize) {
    gauge!(SYMBOLS_ASSIGNED, count as f64, "node" => node.to_string());
}

pub fn calc_latency(metric: &'static str, cycle: &'static str, millis: f64) {
    histogram!(CALC_LATENCY_MS, millis, "metric" => metric, "cycle" => cycle);
}

pub fn report_published(symbol: &str) {
    counter!(REPORT_PUBLISH_TOTAL, 1, "symbol" => symbol.to_string());
}

pub fn data_age(symbol: &str, age_ms: i64) {
    histogram!(DATA_AGE_MS, age_ms as f64, "symbol" => symbol.to_string());
}

pub fn lease_conflict() {
    counter!(LEASE_CONFLICTS_TOTAL, 1);
}

pub fn hrw_rebalance() {
    counter!(HRW_REBALANCES_TOTAL, 1);
}

pub fn ws_resubscribe(reason: &'static str) {
    counter!(WS_RESUBSCRIBE_TOTAL, 1, "reason" => reason);
}

pub fn invalid_events(symbol: &str, count: usize) {
    counter!(INVALID_EVENTS_TOTAL, count as u64, "symbol" => symbol.to_string());
}

pub fn skipped_cycles(symbol: &str, cycle: &'static str, count: u64) {
    counter!(SKIPPED_CYCLES_TOTAL, count, "symbol" => symbol.to_string(), "cycle" => cycle);
}

pub fn stream_emit_failure(symbol: &str) {
    counter!(STREAM_EMIT_FAILURES_TOTAL, 1, "symbol" => symbol.to_string());
}
