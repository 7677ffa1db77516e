//! Cluster membership via heartbeats
//!
//! Each node writes `nt:node:{id}` with a 5 s expiry every second (with
//! jitter) and records itself in the `nt:nodes_seen` sorted set. Discovery
//! enumerates live records; when the cache is briefly unreachable it serves
//! the last known good peer list instead of emptying the cluster.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::keys;
use crate::cache::pool::CachePool;
use crate::error::CacheError;
use crate::telemetry;

/// Membership record TTL
const NODE_TTL_MS: i64 = 5_000;

/// Heartbeat jitter bound (± this many milliseconds)
const HEARTBEAT_JITTER_MS: u64 = 100;

/// Window the nodes_seen sorted set is trimmed to
const NODES_SEEN_WINDOW_SEC: i64 = 10;

/// How long a stale peer list may be served while the cache is unreachable
const LAST_GOOD_MAX_AGE: Duration = Duration::from_secs(30);

/// One node's membership record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub hostname: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub metrics_url: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_milliseconds() <= NODE_TTL_MS
    }
}

/// Heartbeat writer + peer discovery
pub struct Membership {
    pool: CachePool,
    record: NodeRecord,
    interval: Duration,
    last_good: Mutex<Option<(Vec<NodeRecord>, Instant)>>,
}

impl Membership {
    pub fn new(
        pool: CachePool,
        node_id: &str,
        metrics_port: u16,
        heartbeat_interval_ms: u64,
    ) -> Self {
        let hostname =
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let record = NodeRecord {
            node_id: node_id.to_string(),
            hostname: hostname.clone(),
            pid: std::process::id(),
            started_at: Utc::now(),
            metrics_url: format!("http://{hostname}:{metrics_port}/metrics"),
            last_heartbeat: Utc::now(),
        };
        Self {
            pool,
            record,
            interval: Duration::from_millis(heartbeat_interval_ms),
            last_good: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.record.node_id
    }

    /// Run the heartbeat loop until cancelled, then deregister
    pub async fn run_heartbeat(&self, cancel: CancellationToken) {
        info!(node_id = %self.record.node_id, "heartbeat loop started");
        loop {
            if let Err(e) = self.heartbeat().await {
                warn!(node_id = %self.record.node_id, error = %e, "heartbeat failed");
            } else {
                telemetry::heartbeat(&self.record.node_id);
            }

            let jitter_bound = HEARTBEAT_JITTER_MS as i64;
            let jitter = rand::thread_rng().gen_range(-jitter_bound..=jitter_bound);
            let sleep_ms = (self.interval.as_millis() as i64 + jitter).max(0) as u64;
            let sleep = Duration::from_millis(sleep_ms);

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = cancel.cancelled() => break,
            }
        }

        if let Err(e) = self.deregister().await {
            warn!(node_id = %self.record.node_id, error = %e, "deregistration failed");
        } else {
            info!(node_id = %self.record.node_id, "membership record removed");
        }
    }

    /// Write our membership record and trim the seen set
    pub async fn heartbeat(&self) -> Result<(), CacheError> {
        let mut record = self.record.clone();
        record.last_heartbeat = Utc::now();
        let payload =
            serde_json::to_string(&record).map_err(|e| CacheError::UnexpectedReply(e.to_string()))?;

        let now_epoch = record.last_heartbeat.timestamp();
        let mut conn = self.pool.connection();
        self.pool
            .run(async {
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(keys::node_key(&record.node_id))
                    .arg(&payload)
                    .arg("PX")
                    .arg(NODE_TTL_MS)
                    .ignore()
                    .zadd(keys::NODES_SEEN, &record.node_id, now_epoch)
                    .ignore()
                    .cmd("ZREMRANGEBYSCORE")
                    .arg(keys::NODES_SEEN)
                    .arg("-inf")
                    .arg(now_epoch - NODES_SEEN_WINDOW_SEC)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await
    }

    /// Enumerate live peers
    ///
    /// On a cache failure the last successful result is returned as long as
    /// it is under 30 s old; beyond that the error surfaces.
    pub async fn discover(&self) -> Result<Vec<NodeRecord>, CacheError> {
        match self.discover_uncached().await {
            Ok(peers) => {
                // The cached list is replaced wholesale, so a poisoned lock
                // holds a consistent (merely stale) value and is safe to adopt.
                *self.last_good.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((peers.clone(), Instant::now()));
                Ok(peers)
            }
            Err(e) if e.is_retryable() => {
                let last_good = self
                    .last_good
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match last_good.as_ref() {
                    Some((peers, at)) if at.elapsed() < LAST_GOOD_MAX_AGE => {
                        warn!(
                            error = %e,
                            age_ms = at.elapsed().as_millis() as u64,
                            "discovery failed, serving last known good peer list"
                        );
                        Ok(peers.clone())
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn discover_uncached(&self) -> Result<Vec<NodeRecord>, CacheError> {
        let mut conn = self.pool.connection();
        let node_keys: Vec<String> = self
            .pool
            .run(async {
                let mut found = Vec::new();
                let mut cursor: u64 = 0;
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(keys::NODE_KEY_PATTERN)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await?;
                    found.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Ok(found)
            })
            .await?;

        if node_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.connection();
        let payloads: Vec<Option<String>> = self
            .pool
            .run(redis::cmd("MGET").arg(&node_keys).query_async(&mut conn))
            .await?;

        let now = Utc::now();
        let mut peers: Vec<NodeRecord> = payloads
            .into_iter()
            .flatten()
            .filter_map(|raw| match serde_json::from_str::<NodeRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable membership record");
                    None
                }
            })
            .filter(|record| record.is_live(now))
            .collect();

        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(peers)
    }

    /// Remove our record on graceful shutdown
    pub async fn deregister(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.connection();
        self.pool
            .run(async {
                let _: () = redis::pipe()
                    .del(keys::node_key(&self.record.node_id))
                    .ignore()
                    .zrem(keys::NODES_SEEN, &self.record.node_id)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node_id: &str, heartbeat_ago_ms: i64) -> NodeRecord {
        let now = Utc::now();
        NodeRecord {
            node_id: node_id.to_string(),
            hostname: "host".into(),
            pid: 1,
            started_at: now,
            metrics_url: "http://host:9100/metrics".into(),
            last_heartbeat: now - chrono::Duration::milliseconds(heartbeat_ago_ms),
        }
    }

    #[test]
    fn test_liveness_window() {
        let now = Utc::now();
        assert!(record("a", 0).is_live(now));
        assert!(record("a", 4_900).is_live(now));
        assert!(!record("a", 5_100).is_live(now));
    }

    #[test]
    fn test_record_round_trip() {
        let original = record("node-1", 0);
        let json = serde_json::to_string(&original).unwrap();
        let back: NodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
