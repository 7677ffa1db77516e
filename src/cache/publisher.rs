//! Fenced report publication
//!
//! Writes `report:{symbol}` under the writer's fencing token: a Lua script
//! compares the token counter to the token captured at cycle start and only
//! then replaces the document, preserving its TTL. Oversized documents split
//! their heavy sections to `report:{symbol}:heavy`.

use std::collections::VecDeque;
use std::time::Duration;

use redis::Script;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::keys;
use crate::cache::pool::CachePool;
use crate::error::CacheError;
use crate::report::builder::merge_slow_into;
use crate::report::{MarketReport, SlowFields};
use crate::telemetry;

/// Publish retry attempts per cycle
const PUBLISH_ATTEMPTS: u32 = 3;

/// Base retry backoff
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Buffered reports kept per symbol while the cache is unreachable
const BUFFER_LIMIT: usize = 100;

/// Serialized size beyond which heavy sections are split out (~256 KB)
pub const HEAVY_SPLIT_BYTES: usize = 256 * 1024;

/// Report sections moved to the heavy document when splitting
const HEAVY_SECTIONS: [&str; 2] = ["depth", "liquidity"];

/// Publication failures
#[derive(Debug, Error)]
pub enum PublishError {
    /// The fencing token moved on; the writer must self-demote
    #[error("fencing token mismatch for {symbol}")]
    Fenced { symbol: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Per-symbol publisher
///
/// Owned by the symbol's actor; never shared. Failed publishes are buffered
/// (bounded); once a write goes through again only the freshest document
/// matters, so the backlog is dropped rather than replayed.
pub struct ReportPublisher {
    pool: CachePool,
    symbol: String,
    report_key: String,
    heavy_key: String,
    token_key: String,
    ttl_sec: u64,
    heavy_threshold: usize,
    buffer: VecDeque<Value>,
    fenced_set: Script,
}

impl ReportPublisher {
    pub fn new(pool: CachePool, symbol: &str, ttl_sec: u64) -> Self {
        Self {
            pool,
            symbol: symbol.to_string(),
            report_key: keys::report_key(symbol),
            heavy_key: keys::report_heavy_key(symbol),
            token_key: keys::writer_token_key(symbol),
            ttl_sec,
            heavy_threshold: HEAVY_SPLIT_BYTES,
            buffer: VecDeque::new(),
            fenced_set: fenced_set_script(),
        }
    }

    /// Publish a full fast-cycle report
    pub async fn publish_fast(
        &mut self,
        report: &MarketReport,
        token: i64,
    ) -> Result<(), PublishError> {
        let document = serde_json::to_value(report).map_err(|e| {
            PublishError::Cache(CacheError::UnexpectedReply(format!(
                "report serialization failed: {e}"
            )))
        })?;
        self.publish_document(document, token).await
    }

    /// Merge slow-cycle fields into the cached report (read-modify-write)
    ///
    /// With no cached document there is nothing to merge into; the next fast
    /// cycle carries the slow fields anyway.
    pub async fn publish_slow(
        &mut self,
        slow: &SlowFields,
        token: i64,
    ) -> Result<(), PublishError> {
        let mut conn = self.pool.connection();
        let cached: Option<String> = self
            .pool
            .run(redis::cmd("GET").arg(&self.report_key).query_async(&mut conn))
            .await?;

        let Some(cached) = cached else {
            debug!(symbol = %self.symbol, "no cached report to merge slow fields into");
            return Ok(());
        };

        let cached: Value = serde_json::from_str(&cached).map_err(|e| {
            PublishError::Cache(CacheError::UnexpectedReply(format!(
                "cached report is not valid JSON: {e}"
            )))
        })?;
        let merged = merge_slow_into(cached, slow).map_err(|e| {
            PublishError::Cache(CacheError::UnexpectedReply(format!(
                "slow merge failed: {e}"
            )))
        })?;

        self.publish_document(merged, token).await
    }

    /// Drop any buffered documents (lease lost or shutdown)
    pub fn discard_buffer(&mut self) {
        self.buffer.clear();
    }

    async fn publish_document(&mut self, document: Value, token: i64) -> Result<(), PublishError> {
        let (main, heavy) = split_heavy(document, &self.heavy_key, self.heavy_threshold);
        if heavy.is_some() {
            debug!(symbol = %self.symbol, "splitting heavy report sections");
        }

        match self.write_with_retries(&main, heavy.as_ref(), token).await {
            Ok(()) => {
                if !self.buffer.is_empty() {
                    info!(
                        symbol = %self.symbol,
                        dropped = self.buffer.len(),
                        "cache reachable again, superseding buffered reports"
                    );
                    self.buffer.clear();
                }
                telemetry::report_published(&self.symbol);
                Ok(())
            }
            Err(PublishError::Cache(e)) if e.is_retryable() => {
                if self.buffer.len() == BUFFER_LIMIT {
                    self.buffer.pop_front();
                }
                self.buffer.push_back(main);
                warn!(
                    symbol = %self.symbol,
                    error = %e,
                    buffered = self.buffer.len(),
                    "publish failed, report buffered"
                );
                Err(PublishError::Cache(e))
            }
            Err(e) => Err(e),
        }
    }

    async fn write_with_retries(
        &self,
        main: &Value,
        heavy: Option<&Value>,
        token: i64,
    ) -> Result<(), PublishError> {
        let mut last_error: Option<CacheError> = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
            match self.write_once(main, heavy, token).await {
                Ok(()) => return Ok(()),
                Err(PublishError::Cache(e)) if e.is_retryable() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(PublishError::Cache(last_error.unwrap_or_else(|| {
            CacheError::Connection("publish retries exhausted".into())
        })))
    }

    async fn write_once(
        &self,
        main: &Value,
        heavy: Option<&Value>,
        token: i64,
    ) -> Result<(), PublishError> {
        if let Some(heavy) = heavy {
            self.fenced_write(&self.heavy_key, heavy, token).await?;
        }
        self.fenced_write(&self.report_key, main, token).await
    }

    async fn fenced_write(&self, key: &str, value: &Value, token: i64) -> Result<(), PublishError> {
        let payload = value.to_string();
        let mut conn = self.pool.connection();
        let accepted: i64 = self
            .pool
            .run(
                self.fenced_set
                    .key(&self.token_key)
                    .key(key)
                    .arg(token)
                    .arg(payload)
                    .arg(self.ttl_sec)
                    .invoke_async(&mut conn),
            )
            .await?;

        if accepted == 1 {
            Ok(())
        } else {
            Err(PublishError::Fenced {
                symbol: self.symbol.clone(),
            })
        }
    }
}

/// Move heavy sections into a sibling document when the serialized size
/// crosses the threshold; the main document keeps a reference.
///
/// The trigger is byte size of the serialized JSON, not field count.
fn split_heavy(mut document: Value, heavy_key: &str, threshold: usize) -> (Value, Option<Value>) {
    let serialized_len = document.to_string().len();
    if serialized_len <= threshold {
        return (document, None);
    }

    let Value::Object(ref mut map) = document else {
        return (document, None);
    };

    let mut heavy = serde_json::Map::new();
    for section in HEAVY_SECTIONS {
        if let Some(value) = map.remove(section) {
            heavy.insert(section.to_string(), value);
        }
    }
    if heavy.is_empty() {
        return (document, None);
    }

    map.insert("heavy_ref".into(), Value::String(heavy_key.to_string()));
    (document, Some(Value::Object(heavy)))
}

/// Token-checked SET that preserves an existing TTL
fn fenced_set_script() -> Script {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if not current or tonumber(current) ~= tonumber(ARGV[1]) then
            return 0
        end
        if redis.call('EXISTS', KEYS[2]) == 1 then
            redis.call('SET', KEYS[2], ARGV[2], 'KEEPTTL')
        else
            redis.call('SET', KEYS[2], ARGV[2], 'EX', tonumber(ARGV[3]))
        end
        return 1
        "#,
    )
}
