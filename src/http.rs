//! Health and metrics surface
//!
//! A small axum server exposing `GET /healthz` (coordination summary) and
//! `GET /metrics` (Prometheus text). Observational only; nothing here can
//! mutate service state.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Health endpoint document
#[derive(Debug, Serialize)]
struct HealthDoc {
    status: &'static str,
    node_id: String,
    uptime_seconds: u64,
    coordination: CoordinationDoc,
}

#[derive(Debug, Serialize)]
struct CoordinationDoc {
    enabled: bool,
    owned_symbols: Vec<String>,
    configured_symbols: usize,
}

/// Shared state behind the health routes
#[derive(Clone)]
pub struct HealthState {
    node_id: String,
    started_at: Instant,
    configured: Arc<Vec<String>>,
    owned: Arc<RwLock<HashSet<String>>>,
}

impl HealthState {
    pub fn new(
        node_id: String,
        configured: Vec<String>,
        owned: Arc<RwLock<HashSet<String>>>,
    ) -> Self {
        Self {
            node_id,
            started_at: Instant::now(),
            configured: Arc::new(configured),
            owned,
        }
    }
}

/// Install the Prometheus recorder once per process
///
/// Further calls return the handle installed by the first one.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Ok(HANDLE.get_or_init(|| handle).clone()),
        // A concurrent caller won the install race; its handle serves us.
        Err(e) => HANDLE.get().cloned().ok_or_else(|| anyhow::Error::new(e)),
    }
}

/// Serve /healthz and /metrics until cancelled
pub async fn serve_health(
    port: u16,
    state: HealthState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let prometheus = install_prometheus()?;
    let router = Router::new()
        .route("/healthz", get(healthz))
        .with_state(state)
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn healthz(State(state): State<HealthState>) -> Json<HealthDoc> {
    let mut owned: Vec<String> = state
        .owned
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    owned.sort();

    Json(HealthDoc {
        status: "ok",
        node_id: state.node_id.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        coordination: CoordinationDoc {
            enabled: true,
            owned_symbols: owned,
            configured_symbols: state.configured.len(),
        },
    })
}
