//! Shared Redis connection handling
//!
//! One multiplexed `ConnectionManager` shared read+write across every loop.
//! All operations run under the 5 s operation timeout; the initial connect is
//! bounded separately at 2 s. Callers clone the pool freely.

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use tracing::info;

use crate::error::CacheError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-operation socket timeout
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to the shared cache connection
#[derive(Clone)]
pub struct CachePool {
    manager: ConnectionManager,
}

impl CachePool {
    /// Connect to the cache
    ///
    /// `password` overrides any credential embedded in the URL.
    pub async fn connect(url: &str, password: Option<&str>) -> Result<Self, CacheError> {
        let mut info = url
            .into_connection_info()
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }

        let client = Client::open(info).map_err(|e| CacheError::Connection(e.to_string()))?;
        let manager = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(CONNECT_TIMEOUT.as_millis() as u64))?
            .map_err(CacheError::from)?;

        info!("cache connection established");
        Ok(Self { manager })
    }

    /// Fresh handle to the multiplexed connection
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Run one cache operation under the shared timeout
    pub async fn run<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, op).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(OP_TIMEOUT.as_millis() as u64)),
        }
    }
}

impl std::fmt::Debug for CachePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePool").finish_non_exhaustive()
    }
}
