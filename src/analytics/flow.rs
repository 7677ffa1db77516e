//! Order-flow metrics (fast cycle)
//!
//! Event rate over the 10 s window and signed aggressor volume over the 30 s
//! window. Pure functions over the symbol's trade buffers.

use crate::market::{Side, SymbolState};

/// Flow metrics for the report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowMetrics {
    /// |events in last 10 s| / 10
    pub orders_per_sec: f64,

    /// Σ BUY-aggressor volume − Σ SELL-aggressor volume over 30 s
    pub net_flow: f64,
}

/// Compute flow metrics at `now_ms`
pub fn calculate_flow(state: &SymbolState, now_ms: i64) -> FlowMetrics {
    let events_10s = state.trades_10s.filter_since(now_ms - 10_000).count();
    let orders_per_sec = events_10s as f64 / 10.0;

    let net_flow = state
        .trades_30s
        .filter_since(now_ms - 30_000)
        .map(|t| match t.aggressor_side {
            Side::Buy => t.volume,
            Side::Sell => -t.volume,
        })
        .sum();

    FlowMetrics {
        orders_per_sec,
        net_flow,
    }
}
