//! Configuration management
//!
//! All knobs load from `NT_*` environment variables once at startup and are
//! validated fail-fast. Invalid values abort the process before any loop or
//! connection is started.

use std::time::Duration;

use crate::error::ConfigError;

/// Default Binance REST endpoint (initial depth snapshots)
const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Default Binance WebSocket endpoint (combined streams are appended)
const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443";

/// Service configuration
///
/// Periods are milliseconds. See `from_env` for the environment variable per
/// field and the validation rules.
#[derive(Debug, Clone)]
pub struct Config {
    /// Symbols this cluster covers (uppercase, e.g. "BTCUSDT")
    pub symbols: Vec<String>,

    /// Stable node identity; survives restarts of the same instance
    pub node_id: String,

    /// Fast-cycle period (100–1000 ms)
    pub report_period_ms: u64,

    /// Slow-cycle period (≥ 1000 ms)
    pub slow_period_ms: u64,

    /// Writer lease TTL; renewals run at half this
    pub lease_ttl_ms: u64,

    /// Minimum ownership hold before HRW may move a symbol
    pub min_hold_ms: u64,

    /// Sticky weight bonus for the current owner (fraction, default 0.02)
    pub hrw_sticky_pct: f64,

    /// Membership heartbeat period
    pub heartbeat_interval_ms: u64,

    /// Port for /healthz and /metrics
    pub metrics_port: u16,

    /// Redis connection URL
    pub cache_url: String,

    /// Optional Redis password (overrides any password in the URL)
    pub cache_password: Option<String>,

    /// Published report TTL in seconds
    pub report_ttl_sec: u64,

    /// Exchange price increment used for volume-profile binning
    pub tick_size: f64,

    /// Volume-profile bin width in ticks
    pub bin_width_ticks: u32,

    /// Absolute floor for the wall threshold (`max(P95 × 1.5, this)`)
    pub wall_min_qty: f64,

    /// Net-flow level below which a decreasing run counts toward
    /// flash-crash risk
    pub flash_net_flow_threshold: f64,

    /// Mirror accepted market events to `nt:events:{symbol}` streams
    pub enable_streams: bool,

    /// Binance REST base URL
    pub rest_url: String,

    /// Binance WebSocket base URL
    pub ws_url: String,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// Required: `NT_SYMBOLS` (comma-separated). `NT_NODE_ID` defaults to the
    /// hostname. Everything else has the documented default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let symbols = parse_symbols(&require("NT_SYMBOLS")?)?;

        let node_id = match optional("NT_NODE_ID") {
            Some(id) => id,
            None => hostname(),
        };

        let config = Config {
            symbols,
            node_id,
            report_period_ms: parse_u64("NT_REPORT_PERIOD_MS", 250)?,
            slow_period_ms: parse_u64("NT_SLOW_PERIOD_MS", 2000)?,
            lease_ttl_ms: parse_u64("NT_LEASE_TTL_MS", 2000)?,
            min_hold_ms: parse_u64("NT_MIN_HOLD_MS", 2000)?,
            hrw_sticky_pct: parse_f64("NT_HRW_STICKY_PCT", 0.02)?,
            heartbeat_interval_ms: parse_u64("NT_HEARTBEAT_INTERVAL_MS", 1000)?,
            metrics_port: parse_u64("NT_METRICS_PORT", 9100)? as u16,
            cache_url: optional("NT_CACHE_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            cache_password: optional("NT_CACHE_PASSWORD"),
            report_ttl_sec: parse_u64("NT_REPORT_TTL_SEC", 300)?,
            tick_size: parse_f64("NT_TICK_SIZE", 0.01)?,
            bin_width_ticks: parse_u64("NT_BIN_WIDTH_TICKS", 5)? as u32,
            wall_min_qty: parse_f64("NT_WALL_MIN_QTY", 0.0)?,
            flash_net_flow_threshold: parse_f64("NT_FLASH_NET_FLOW_THRESHOLD", 0.0)?,
            enable_streams: parse_bool("NT_ENABLE_STREAMS", false)?,
            rest_url: optional("NT_BINANCE_REST_URL").unwrap_or_else(|| DEFAULT_REST_URL.into()),
            ws_url: optional("NT_BINANCE_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.into()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation per the coordination design
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Invalid {
                name: "NT_SYMBOLS",
                value: String::new(),
                reason: "at least one symbol is required".into(),
            });
        }
        if !(100..=1000).contains(&self.report_period_ms) {
            return Err(ConfigError::Invalid {
                name: "NT_REPORT_PERIOD_MS",
                value: self.report_period_ms.to_string(),
                reason: "must be within 100..=1000".into(),
            });
        }
        if self.slow_period_ms < 1000 {
            return Err(ConfigError::Invalid {
                name: "NT_SLOW_PERIOD_MS",
                value: self.slow_period_ms.to_string(),
                reason: "must be >= 1000".into(),
            });
        }
        // The lease must outlive both a renewal gap and a full fast cycle,
        // otherwise writers fence themselves out under normal operation.
        if self.lease_ttl_ms < 2 * self.renewal_period().as_millis() as u64 {
            return Err(ConfigError::Invalid {
                name: "NT_LEASE_TTL_MS",
                value: self.lease_ttl_ms.to_string(),
                reason: "must be >= 2x the renewal period".into(),
            });
        }
        if self.lease_ttl_ms < self.report_period_ms {
            return Err(ConfigError::Invalid {
                name: "NT_LEASE_TTL_MS",
                value: self.lease_ttl_ms.to_string(),
                reason: format!("must be >= report period ({})", self.report_period_ms),
            });
        }
        if !(0.0..1.0).contains(&self.hrw_sticky_pct) {
            return Err(ConfigError::Invalid {
                name: "NT_HRW_STICKY_PCT",
                value: self.hrw_sticky_pct.to_string(),
                reason: "must be within [0.0, 1.0)".into(),
            });
        }
        if self.tick_size <= 0.0 || !self.tick_size.is_finite() {
            return Err(ConfigError::Invalid {
                name: "NT_TICK_SIZE",
                value: self.tick_size.to_string(),
                reason: "must be a positive finite number".into(),
            });
        }
        if self.bin_width_ticks == 0 {
            return Err(ConfigError::Invalid {
                name: "NT_BIN_WIDTH_TICKS",
                value: "0".into(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }

    /// Lease renewal period (half the TTL)
    pub fn renewal_period(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms / 2)
    }

    /// Volume-profile bin size in price units
    pub fn profile_bin_size(&self) -> f64 {
        self.tick_size * self.bin_width_ticks as f64
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing { name })
}

fn optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_symbols(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    symbols.sort();
    symbols.dedup();
    if symbols.iter().any(|s| !s.chars().all(|c| c.is_ascii_alphanumeric())) {
        return Err(ConfigError::Invalid {
            name: "NT_SYMBOLS",
            value: raw.to_string(),
            reason: "symbols must be alphanumeric".into(),
        });
    }
    Ok(symbols)
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: v,
            reason: "expected an unsigned integer".into(),
        }),
    }
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: v,
            reason: "expected a number".into(),
        }),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value: v,
                reason: "expected a boolean".into(),
            }),
        },
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("node-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            symbols: vec!["BTCUSDT".into()],
            node_id: "node-a".into(),
            report_period_ms: 250,
            slow_period_ms: 2000,
            lease_ttl_ms: 2000,
            min_hold_ms: 2000,
            hrw_sticky_pct: 0.02,
            heartbeat_interval_ms: 1000,
            metrics_port: 9100,
            cache_url: "redis://127.0.0.1:6379".into(),
            cache_password: None,
            report_ttl_sec: 300,
            tick_size: 0.01,
            bin_width_ticks: 5,
            wall_min_qty: 0.0,
            flash_net_flow_threshold: 0.0,
            enable_streams: false,
            rest_url: DEFAULT_REST_URL.into(),
            ws_url: DEFAULT_WS_URL.into(),
        }
    }

    #[test]
    fn test_default_config_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_fast_period_bounds() {
        let mut c = base_config();
        c.report_period_ms = 50;
        assert!(c.validate().is_err());
        c.report_period_ms = 1000;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_lease_must_cover_fast_cycle() {
        let mut c = base_config();
        c.report_period_ms = 1000;
        c.lease_ttl_ms = 500;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_slow_period_floor() {
        let mut c = base_config();
        c.slow_period_ms = 999;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_parse_symbols_dedup_and_case() {
        let symbols = parse_symbols("ethusdt, BTCUSDT,ETHUSDT").unwrap();
        assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[test]
    fn test_profile_bin_size() {
        let c = base_config();
        assert!((c.profile_bin_size() - 0.05).abs() < 1e-12);
    }
}
