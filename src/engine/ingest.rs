//! Ingestion freshness state machine
//!
//! Derives the three-state `ok / degraded / down` label from `data_age_ms`.
//! Staleness must be sustained for 2 s before `ok` drops to `degraded`;
//! crossing 5 s goes straight to `down`. Any sufficiently fresh tick returns
//! the machine to `ok`. Transitions are logged as structured events.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Age at or below which data counts as fresh
const FRESH_THRESHOLD_MS: i64 = 1_000;

/// Sustained-staleness window before degrading
const DEGRADE_SUSTAIN_MS: i64 = 2_000;

/// Age beyond which ingestion is down
const DOWN_THRESHOLD_MS: i64 = 5_000;

/// Published ingestion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Ok,
    Degraded,
    Down,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Ok => "ok",
            IngestionStatus::Degraded => "degraded",
            IngestionStatus::Down => "down",
        }
    }
}

/// Per-symbol freshness tracker
#[derive(Debug, Clone)]
pub struct IngestionTracker {
    symbol: String,
    status: IngestionStatus,

    /// When `data_age_ms` was first observed above the fresh threshold
    stale_since: Option<i64>,
}

impl IngestionTracker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            status: IngestionStatus::Ok,
            stale_since: None,
        }
    }

    pub fn status(&self) -> IngestionStatus {
        self.status
    }

    /// `fresh` label for the report (`status == ok`)
    pub fn fresh(&self) -> bool {
        self.status == IngestionStatus::Ok
    }

    /// Observe the current data age; returns the (possibly new) status
    pub fn observe(&mut self, now_ms: i64, data_age_ms: i64) -> IngestionStatus {
        let next = self.next_status(now_ms, data_age_ms);
        if next != self.status {
            info!(
                symbol = %self.symbol,
                from = self.status.as_str(),
                to = next.as_str(),
                data_age_ms,
                "ingestion status transition"
            );
            self.status = next;
        }
        self.status
    }

    fn next_status(&mut self, now_ms: i64, data_age_ms: i64) -> IngestionStatus {
        if data_age_ms <= FRESH_THRESHOLD_MS {
            self.stale_since = None;
            return IngestionStatus::Ok;
        }

        if data_age_ms > DOWN_THRESHOLD_MS {
            self.stale_since.get_or_insert(now_ms);
            return IngestionStatus::Down;
        }

        let since = *self.stale_since.get_or_insert(now_ms);
        match self.status {
            // Staleness must persist before ok drops.
            IngestionStatus::Ok if now_ms - since < DEGRADE_SUSTAIN_MS => IngestionStatus::Ok,
            _ => IngestionStatus::Degraded,
        }
    }
}
