//! Writer leases with monotonic fencing tokens
//!
//! One lease per symbol, held by at most one node. Acquire, renew and
//! release each run as a single Lua script so there is no partial state.
//! The token counter only ever increments; it is the authoritative identity
//! of "which writer this report came from".

use redis::Script;
use tracing::{debug, info, warn};

use crate::cache::keys;
use crate::cache::pool::CachePool;
use crate::error::{CacheError, LeaseError};

/// One successfully acquired lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub symbol: String,
    pub token: i64,
}

/// Lease operations against the shared cache
#[derive(Clone)]
pub struct LeaseManager {
    pool: CachePool,
    node_id: String,
    ttl_ms: u64,
    acquire_script: Script,
    renew_script: Script,
    release_script: Script,
}

impl LeaseManager {
    pub fn new(pool: CachePool, node_id: &str, ttl_ms: u64) -> Self {
        Self {
            pool,
            node_id: node_id.to_string(),
            ttl_ms,
            acquire_script: acquire_script(),
            renew_script: renew_script(),
            release_script: release_script(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Try to acquire the lease for `symbol`
    ///
    /// Returns `Ok(None)` when another node holds it. On success the token
    /// counter has been incremented and the new token is returned.
    ///
    /// The token saturates: once the counter would pass `i64::MAX` the
    /// symbol is treated as exhausted and acquisition is refused until an
    /// operator resets the counter. Tokens never wrap.
    pub async fn acquire(&self, symbol: &str) -> Result<Option<Lease>, LeaseError> {
        let mut conn = self.pool.connection();
        let token: Option<i64> = self
            .pool
            .run(
                self.acquire_script
                    .key(keys::writer_key(symbol))
                    .key(keys::writer_token_key(symbol))
                    .arg(&self.node_id)
                    .arg(self.ttl_ms)
                    .invoke_async(&mut conn),
            )
            .await
            .map_err(|e| map_overflow(symbol, e))?;

        match token {
            Some(token) => {
                info!(symbol = %symbol, node_id = %self.node_id, token, "lease acquired");
                Ok(Some(Lease {
                    symbol: symbol.to_string(),
                    token,
                }))
            }
            None => {
                debug!(symbol = %symbol, "lease held elsewhere");
                Ok(None)
            }
        }
    }

    /// Renew our lease; `false` means it was lost
    pub async fn renew(&self, symbol: &str) -> Result<bool, LeaseError> {
        let mut conn = self.pool.connection();
        let renewed: i64 = self
            .pool
            .run(
                self.renew_script
                    .key(keys::writer_key(symbol))
                    .arg(&self.node_id)
                    .arg(self.ttl_ms)
                    .invoke_async(&mut conn),
            )
            .await?;

        if renewed == 0 {
            warn!(symbol = %symbol, node_id = %self.node_id, "lease renewal refused");
        }
        Ok(renewed == 1)
    }

    /// Release our lease; `false` means we no longer held it
    pub async fn release(&self, symbol: &str) -> Result<bool, LeaseError> {
        let mut conn = self.pool.connection();
        let released: i64 = self
            .pool
            .run(
                self.release_script
                    .key(keys::writer_key(symbol))
                    .arg(&self.node_id)
                    .invoke_async(&mut conn),
            )
            .await?;

        if released == 1 {
            info!(symbol = %symbol, node_id = %self.node_id, "lease released");
        }
        Ok(released == 1)
    }

    /// Read the current fencing token for a symbol
    pub async fn current_token(&self, symbol: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.pool.connection();
        self.pool
            .run(
                redis::cmd("GET")
                    .arg(keys::writer_token_key(symbol))
                    .query_async(&mut conn),
            )
            .await
    }

    /// Read the current holder of a symbol's lease
    pub async fn current_holder(&self, symbol: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.pool.connection();
        self.pool
            .run(
                redis::cmd("GET")
                    .arg(keys::writer_key(symbol))
                    .query_async(&mut conn),
            )
            .await
    }
}

fn map_overflow(symbol: &str, error: CacheError) -> LeaseError {
    // Redis refuses INCR past i64::MAX with an overflow error; that is the
    // saturation point for this symbol's token space.
    if let CacheError::Command(msg) = &error {
        if msg.contains("increment or decrement would overflow") {
            return LeaseError::TokenExhausted {
                symbol: symbol.to_string(),
            };
        }
    }
    LeaseError::Cache(error)
}

/// SET NX PX then INCR the token, as one atomic unit
fn acquire_script() -> Script {
    Script::new(
        r#"
        local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', tonumber(ARGV[2]))
        if not ok then
            return nil
        end
        return redis.call('INCR', KEYS[2])
        "#,
    )
}

/// Re-arm the TTL only while we still hold the lease
fn renew_script() -> Script {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
            return 1
        end
        return 0
        "#,
    )
}

/// Delete only while we still hold the lease
fn release_script() -> Script {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('DEL', KEYS[1])
            return 1
        end
        return 0
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_maps_to_token_exhausted() {
        let err = map_overflow(
            "BTCUSDT",
            CacheError::Command("ERR increment or decrement would overflow".into()),
        );
        assert!(matches!(err, LeaseError::TokenExhausted { .. }));
    }

    #[test]
    fn test_other_command_errors_pass_through() {
        let err = map_overflow("BTCUSDT", CacheError::Command("WRONGTYPE".into()));
        assert!(matches!(err, LeaseError::Cache(CacheError::Command(_))));
    }
}
