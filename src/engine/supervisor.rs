//! Service supervisor
//!
//! Owns the cache pool, the background loops (heartbeat, assignment,
//! renewal), the per-symbol actors and the health surface, with one
//! startup/shutdown lifecycle. Shutdown releases every owned lease,
//! unsubscribes all streams and deletes the heartbeat key within a bounded
//! budget before the process exits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{BinanceAdapter, ExchangeAdapter};
use crate::cache::CachePool;
use crate::cluster::{AssignmentController, AssignmentSettings, LeaseManager, Membership, SymbolHost};
use crate::config::Config;
use crate::engine::actor::{
    spawn_symbol_actor, symbol_event_channel, ActorConfig, SymbolActorHandle,
};
use crate::http::{serve_health, HealthState};
use crate::report::builder::BuildParams;

/// Hard ceiling on graceful shutdown
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Capacity of the fence-violation channel
const FENCE_CHANNEL_CAPACITY: usize = 64;

/// Owns the per-symbol actors and drives the adapter
///
/// This is the `SymbolHost` the assignment controller talks to; start and
/// stop preserve the acquire → subscribe → publish and stop → release
/// orderings the controller depends on.
pub struct SymbolManager<A> {
    adapter: Arc<A>,
    pool: CachePool,
    actor_config: ActorConfig,
    actors: Mutex<HashMap<String, SymbolActorHandle>>,
    fence_violations: mpsc::Sender<String>,

    /// Read-only view for the health endpoint
    owned_view: Arc<RwLock<HashSet<String>>>,
}

impl<A: ExchangeAdapter> SymbolManager<A> {
    pub fn new(
        adapter: Arc<A>,
        pool: CachePool,
        actor_config: ActorConfig,
        fence_violations: mpsc::Sender<String>,
    ) -> Self {
        Self {
            adapter,
            pool,
            actor_config,
            actors: Mutex::new(HashMap::new()),
            fence_violations,
            owned_view: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn owned_view(&self) -> Arc<RwLock<HashSet<String>>> {
        Arc::clone(&self.owned_view)
    }

    /// Stop every running symbol (shutdown path)
    pub async fn stop_all(&self) {
        let symbols: Vec<String> = self.actors.lock().await.keys().cloned().collect();
        for symbol in symbols {
            self.stop_symbol(&symbol).await;
        }
    }
}

impl<A: ExchangeAdapter> SymbolHost for SymbolManager<A> {
    async fn start_symbol(&self, symbol: &str, token: i64) -> anyhow::Result<()> {
        let mut actors = self.actors.lock().await;
        if let Some(handle) = actors.get(symbol) {
            // Re-acquired while still running (e.g. rapid rebalance back):
            // just adopt the new token.
            handle
                .token
                .store(token, std::sync::atomic::Ordering::Release);
            return Ok(());
        }

        // Subscribe before cycles start; events buffer in the channel until
        // the actor drains them.
        let (events_tx, events_rx) = symbol_event_channel();
        self.adapter.subscribe(symbol, events_tx).await?;

        let handle = spawn_symbol_actor(
            self.actor_config.clone(),
            symbol,
            token,
            self.pool.clone(),
            events_rx,
            self.fence_violations.clone(),
        );
        actors.insert(symbol.to_string(), handle);
        // The view is a plain set; a writer that panicked mid-insert left
        // nothing half-updated, so a poisoned lock is safe to adopt.
        self.owned_view
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string());

        info!(symbol = %symbol, token, "symbol pipeline started");
        Ok(())
    }

    async fn stop_symbol(&self, symbol: &str) {
        let handle = self.actors.lock().await.remove(symbol);
        if let Some(handle) = handle {
            // Publishing and cycles stop before the stream goes away.
            handle.stop().await;
        }
        self.adapter.unsubscribe(symbol).await;
        self.owned_view
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(symbol);
        info!(symbol = %symbol, "symbol pipeline stopped");
    }
}

/// Top-level service lifecycle
pub struct Supervisor;

impl Supervisor {
    /// Run until `shutdown` fires, then wind everything down
    pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(node_id = %config.node_id, symbols = config.symbols.len(), "starting nodetide");

        let pool = CachePool::connect(&config.cache_url, config.cache_password.as_deref()).await?;
        let adapter = Arc::new(BinanceAdapter::new(&config.rest_url, &config.ws_url));

        let actor_config = ActorConfig {
            node_id: config.node_id.clone(),
            report_period: Duration::from_millis(config.report_period_ms),
            slow_period: Duration::from_millis(config.slow_period_ms),
            report_ttl_sec: config.report_ttl_sec,
            build_params: BuildParams {
                profile_bin_size: config.profile_bin_size(),
                profile_window_sec: 1_800,
                wall_min_qty: config.wall_min_qty,
                flash_net_flow_threshold: config.flash_net_flow_threshold,
            },
            enable_streams: config.enable_streams,
        };

        let (fence_tx, mut fence_rx) = mpsc::channel(FENCE_CHANNEL_CAPACITY);
        let manager = Arc::new(SymbolManager::new(
            Arc::clone(&adapter),
            pool.clone(),
            actor_config,
            fence_tx,
        ));

        let membership = Arc::new(Membership::new(
            pool.clone(),
            &config.node_id,
            config.metrics_port,
            config.heartbeat_interval_ms,
        ));
        let lease = LeaseManager::new(pool.clone(), &config.node_id, config.lease_ttl_ms);
        let controller = Arc::new(AssignmentController::new(
            Arc::clone(&membership),
            lease,
            Arc::clone(&manager),
            AssignmentSettings {
                symbols: config.symbols.clone(),
                sticky_pct: config.hrw_sticky_pct,
                min_hold: Duration::from_millis(config.min_hold_ms),
                renewal_period: config.renewal_period(),
            },
        ));

        let root = CancellationToken::new();
        let mut tasks = Vec::new();

        {
            let membership = Arc::clone(&membership);
            let cancel = root.child_token();
            tasks.push(tokio::spawn(async move {
                membership.run_heartbeat(cancel).await;
            }));
        }
        {
            let controller = Arc::clone(&controller);
            let cancel = root.child_token();
            tasks.push(tokio::spawn(async move {
                controller.run_reconcile(cancel).await;
            }));
        }
        {
            let controller = Arc::clone(&controller);
            let cancel = root.child_token();
            tasks.push(tokio::spawn(async move {
                controller.run_renewal(cancel).await;
            }));
        }
        {
            // Fencing violations reported by actors feed back into the
            // controller as lost leases.
            let controller = Arc::clone(&controller);
            let cancel = root.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe = fence_rx.recv() => match maybe {
                            Some(symbol) => controller.handle_fence_violation(&symbol).await,
                            None => break,
                        },
                        _ = cancel.cancelled() => break,
                    }
                }
            }));
        }
        {
            let health = HealthState::new(
                config.node_id.clone(),
                config.symbols.clone(),
                manager.owned_view(),
            );
            let port = config.metrics_port;
            let cancel = root.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve_health(port, health, cancel).await {
                    error!(error = %e, "health server failed");
                }
            }));
        }

        shutdown.cancelled().await;
        info!("shutdown requested");

        let wind_down = async {
            // Order matters: stop taking new work, give up every lease
            // cleanly, then let the heartbeat loop deregister on cancel.
            root.cancel();
            controller.release_all().await;
            manager.stop_all().await;
            for task in tasks {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(SHUTDOWN_BUDGET, wind_down).await.is_err() {
            warn!(budget_secs = SHUTDOWN_BUDGET.as_secs(), "shutdown budget exceeded, forcing exit");
        } else {
            info!("shutdown complete");
        }
        Ok(())
    }
}
