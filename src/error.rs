use thiserror::Error;

/// Cache-plane errors (Redis connectivity and command failures)
///
/// Transient variants are retried with backoff at the publish layer and never
/// escape a symbol's cycle chain.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("command error: {0}")]
    Command(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl CacheError {
    /// Transient errors are retryable; command/reply errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Connection(_) | CacheError::Timeout(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout(0)
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

/// Writer-lease errors
///
/// A lease held by another node is not an error (acquire returns `None`),
/// and a lost lease is conveyed by renewal returning `false`; only genuine
/// failures surface here.
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("fencing token space exhausted for {symbol}")]
    TokenExhausted { symbol: String },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Calculator errors
///
/// These omit the affected report field, they never abort the whole report —
/// except `InvariantViolation`, which aborts the cycle's publish entirely.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CalcError {
    #[error("order book side empty")]
    EmptyBook,

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Malformed ingress events (logged and counted, never surfaced)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("negative quantity {qty} at price {price}")]
    NegativeQuantity { price: String, qty: String },

    #[error("non-finite number in {field}")]
    NonFinite { field: &'static str },

    #[error("unknown side: {0}")]
    UnknownSide(String),
}

/// Startup configuration errors (fail-fast)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} is required but not set")]
    Missing { name: &'static str },

    #[error("{name}={value} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_retryability() {
        assert!(CacheError::Connection("refused".into()).is_retryable());
        assert!(CacheError::Timeout(5000).is_retryable());
        assert!(!CacheError::Command("WRONGTYPE".into()).is_retryable());
        assert!(!CacheError::UnexpectedReply("nil".into()).is_retryable());
    }
}
