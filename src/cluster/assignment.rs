//! Assignment controller
//!
//! Reconciles the HRW target set against what this node currently owns and
//! drives lease acquire/release plus symbol start/stop in the mandatory
//! order: acquire → start (subscribe, cycles) for new symbols, and
//! stop (publishing, cycles, unsubscribe) → release when giving one up.
//! Reordering either sequence opens a split-brain window with the previous
//! or next owner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::lease::LeaseManager;
use crate::cluster::membership::Membership;
use crate::cluster::sharding::select_owner;
use crate::telemetry;

/// Reconcile cadence
const RECONCILE_INTERVAL: Duration = Duration::from_millis(2_500);

/// Base backoff after a failed reconcile
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff ceiling
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// The engine side the controller drives
///
/// Implemented by the supervisor's symbol manager; a start must subscribe to
/// the adapter and start cycles, a stop must cease publishing, stop cycles
/// and unsubscribe, in that order.
pub trait SymbolHost: Send + Sync + 'static {
    fn start_symbol(
        &self,
        symbol: &str,
        token: i64,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn stop_symbol(&self, symbol: &str) -> impl std::future::Future<Output = ()> + Send;
}

/// A symbol this node currently owns
#[derive(Debug, Clone)]
pub struct OwnedSymbol {
    pub token: i64,
    pub acquired_at: Instant,
}

/// What one reconcile pass intends to do
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_acquire: Vec<String>,
    pub to_release: Vec<String>,
}

/// Compute this node's HRW target set
///
/// `owners` maps symbols to their current lease holder (for the sticky
/// bonus); holders that are no longer live peers get no bonus.
pub fn compute_target(
    symbols: &[String],
    peer_ids: &[String],
    owners: &HashMap<String, String>,
    self_id: &str,
    sticky_pct: f64,
) -> HashSet<String> {
    symbols
        .iter()
        .filter(|symbol| {
            let current = owners.get(*symbol).map(String::as_str);
            select_owner(symbol, peer_ids, current, sticky_pct) == Some(self_id)
        })
        .cloned()
        .collect()
}

/// Diff the target set against current ownership
///
/// Releases respect the minimum hold: a symbol acquired less than
/// `min_hold` ago stays put even when HRW wants it elsewhere.
pub fn plan_reconcile(
    target: &HashSet<String>,
    owned: &HashMap<String, OwnedSymbol>,
    min_hold: Duration,
    now: Instant,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for symbol in target {
        if !owned.contains_key(symbol) {
            plan.to_acquire.push(symbol.clone());
        }
    }
    for (symbol, entry) in owned {
        if !target.contains(symbol) && now.duration_since(entry.acquired_at) >= min_hold {
            plan.to_release.push(symbol.clone());
        }
    }

    plan.to_acquire.sort();
    plan.to_release.sort();
    plan
}

/// Assignment controller settings
#[derive(Debug, Clone)]
pub struct AssignmentSettings {
    pub symbols: Vec<String>,
    pub sticky_pct: f64,
    pub min_hold: Duration,
    pub renewal_period: Duration,
}

/// Drives ownership for one node
pub struct AssignmentController<H> {
    membership: Arc<Membership>,
    lease: LeaseManager,
    host: Arc<H>,
    settings: AssignmentSettings,
    owned: Mutex<HashMap<String, OwnedSymbol>>,
}

impl<H: SymbolHost> AssignmentController<H> {
    pub fn new(
        membership: Arc<Membership>,
        lease: LeaseManager,
        host: Arc<H>,
        settings: AssignmentSettings,
    ) -> Self {
        Self {
            membership,
            lease,
            host,
            settings,
            owned: Mutex::new(HashMap::new()),
        }
    }

    /// Symbols currently owned with their tokens
    pub async fn owned_symbols(&self) -> Vec<(String, i64)> {
        self.owned
            .lock()
            .await
            .iter()
            .map(|(s, o)| (s.clone(), o.token))
            .collect()
    }

    /// Reconcile loop; exponential backoff (capped at 5 s) after failures
    pub async fn run_reconcile(&self, cancel: CancellationToken) {
        info!(node_id = %self.lease.node_id(), "assignment controller started");
        let mut failure_streak = 0u32;
        loop {
            let delay = match self.reconcile().await {
                Ok(()) => {
                    failure_streak = 0;
                    RECONCILE_INTERVAL
                }
                Err(e) => {
                    failure_streak = failure_streak.saturating_add(1);
                    let backoff =
                        (BACKOFF_BASE * 2u32.pow(failure_streak.min(4))).min(BACKOFF_CAP);
                    warn!(error = %e, streak = failure_streak, "reconcile failed, backing off");
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// Renewal loop at half the lease TTL
    pub async fn run_renewal(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.renewal_period) => {}
                _ = cancel.cancelled() => break,
            }
            self.renew_owned().await;
        }
    }

    /// One reconcile pass
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let peers = self.membership.discover().await?;
        let mut peer_ids: Vec<String> = peers.into_iter().map(|p| p.node_id).collect();
        // Our own heartbeat may not have landed yet on the very first pass.
        let self_id = self.lease.node_id().to_string();
        if !peer_ids.contains(&self_id) {
            peer_ids.push(self_id.clone());
            peer_ids.sort();
        }

        let owners = self.current_owners().await?;
        let target = compute_target(
            &self.settings.symbols,
            &peer_ids,
            &owners,
            &self_id,
            self.settings.sticky_pct,
        );

        let plan = {
            let owned = self.owned.lock().await;
            plan_reconcile(&target, &owned, self.settings.min_hold, Instant::now())
        };

        for symbol in &plan.to_release {
            self.release_symbol(symbol).await;
            telemetry::hrw_rebalance();
        }

        for symbol in &plan.to_acquire {
            match self.acquire_symbol(symbol).await {
                Ok(true) => telemetry::hrw_rebalance(),
                Ok(false) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "acquire failed"),
            }
        }

        let owned = self.owned.lock().await;
        telemetry::symbols_assigned(&self_id, owned.len());
        Ok(())
    }

    /// Stop + release every owned symbol (shutdown path)
    pub async fn release_all(&self) {
        let symbols: Vec<String> = self.owned.lock().await.keys().cloned().collect();
        for symbol in symbols {
            self.release_symbol(&symbol).await;
        }
    }

    /// An actor saw a fencing violation; treat it as a lost lease
    pub async fn handle_fence_violation(&self, symbol: &str) {
        warn!(symbol = %symbol, "fencing violation reported, dropping symbol");
        telemetry::lease_conflict();
        self.drop_symbol(symbol).await;
    }

    async fn acquire_symbol(&self, symbol: &str) -> anyhow::Result<bool> {
        let Some(lease) = self.lease.acquire(symbol).await? else {
            // Held elsewhere; normal during handover, retried next pass.
            return Ok(false);
        };

        if let Err(e) = self.host.start_symbol(symbol, lease.token).await {
            error!(symbol = %symbol, error = %e, "symbol start failed, releasing lease");
            let _ = self.lease.release(symbol).await;
            return Err(e);
        }

        self.owned.lock().await.insert(
            symbol.to_string(),
            OwnedSymbol {
                token: lease.token,
                acquired_at: Instant::now(),
            },
        );
        Ok(true)
    }

    async fn release_symbol(&self, symbol: &str) {
        // Stop before release: publishing must have ceased before another
        // node can take the lease.
        self.host.stop_symbol(symbol).await;
        if let Err(e) = self.lease.release(symbol).await {
            warn!(symbol = %symbol, error = %e, "lease release failed (TTL will expire it)");
        }
        self.owned.lock().await.remove(symbol);
        info!(symbol = %symbol, "symbol released");
    }

    /// Drop without releasing (the lease is already gone)
    async fn drop_symbol(&self, symbol: &str) {
        self.host.stop_symbol(symbol).await;
        self.owned.lock().await.remove(symbol);
    }

    async fn renew_owned(&self) {
        let symbols: Vec<String> = self.owned.lock().await.keys().cloned().collect();
        for symbol in symbols {
            match self.lease.renew(&symbol).await {
                Ok(true) => {}
                Ok(false) => {
                    // Renew returned 0: someone else holds it now.
                    telemetry::lease_conflict();
                    warn!(symbol = %symbol, "lease lost at renewal, dropping symbol");
                    self.drop_symbol(&symbol).await;
                }
                Err(e) => {
                    // Transient cache trouble: keep the symbol and let the
                    // next renewal (or the TTL) decide.
                    warn!(symbol = %symbol, error = %e, "lease renewal errored");
                }
            }
        }
    }

    async fn current_owners(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut owners = HashMap::new();
        for symbol in &self.settings.symbols {
            if let Some(holder) = self.lease.current_holder(symbol).await? {
                owners.insert(symbol.clone(), holder);
            }
        }
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_entry(token: i64, held_for: Duration) -> OwnedSymbol {
        OwnedSymbol {
            token,
            acquired_at: Instant::now() - held_for,
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_acquires_missing_target_symbols() {
        let target: HashSet<String> = strings(&["BTCUSDT", "ETHUSDT"]).into_iter().collect();
        let owned = HashMap::from([(
            "BTCUSDT".to_string(),
            owned_entry(1, Duration::from_secs(60)),
        )]);
        let plan = plan_reconcile(&target, &owned, Duration::from_secs(2), Instant::now());
        assert_eq!(plan.to_acquire, strings(&["ETHUSDT"]));
        assert!(plan.to_release.is_empty());
    }

    #[test]
    fn test_plan_releases_only_after_min_hold() {
        let target = HashSet::new();
        let owned = HashMap::from([
            (
                "FRESH".to_string(),
                owned_entry(1, Duration::from_millis(500)),
            ),
            ("OLD".to_string(), owned_entry(2, Duration::from_secs(10))),
        ]);
        let plan = plan_reconcile(&target, &owned, Duration::from_secs(2), Instant::now());
        assert_eq!(plan.to_release, strings(&["OLD"]));
        assert!(plan.to_acquire.is_empty());
    }

    #[test]
    fn test_plan_steady_state_is_empty() {
        let target: HashSet<String> = strings(&["BTCUSDT"]).into_iter().collect();
        let owned = HashMap::from([(
            "BTCUSDT".to_string(),
            owned_entry(1, Duration::from_secs(60)),
        )]);
        let plan = plan_reconcile(&target, &owned, Duration::from_secs(2), Instant::now());
        assert_eq!(plan, ReconcilePlan::default());
    }

    #[test]
    fn test_target_partitions_symbols_across_peers() {
        let peers = strings(&["node-a", "node-b", "node-c"]);
        let symbols: Vec<String> = (0..15).map(|i| format!("SYM{i}USDT")).collect();
        let owners = HashMap::new();

        let mut total = 0usize;
        for peer in &peers {
            let target = compute_target(&symbols, &peers, &owners, peer, 0.02);
            total += target.len();
        }
        // Every symbol lands on exactly one node.
        assert_eq!(total, symbols.len());
    }

    #[test]
    fn test_failover_moves_only_dead_nodes_symbols() {
        let full = strings(&["node-a", "node-b", "node-c"]);
        let survivors = strings(&["node-a", "node-c"]);
        let symbols: Vec<String> = (0..15).map(|i| format!("SYM{i}USDT")).collect();
        let owners = HashMap::new();

        let a_before = compute_target(&symbols, &full, &owners, "node-a", 0.0);
        let c_before = compute_target(&symbols, &full, &owners, "node-c", 0.0);
        let a_after = compute_target(&symbols, &survivors, &owners, "node-a", 0.0);
        let c_after = compute_target(&symbols, &survivors, &owners, "node-c", 0.0);

        // Survivors keep everything they had.
        assert!(a_before.is_subset(&a_after));
        assert!(c_before.is_subset(&c_after));
        // And together they now cover all symbols, each exactly once.
        assert_eq!(a_after.len() + c_after.len(), symbols.len());
        assert!(a_after.is_disjoint(&c_after));
    }
}
