//! Per-symbol actor
//!
//! One task per owned symbol consumes that symbol's market events and runs
//! the fast and slow report cycles. Everything for a symbol happens on this
//! single logical thread, so state updates and cycle snapshots never race.
//! The fencing token is read through an atomic the assignment controller
//! owns; the actor never holds a reference back into the lease manager.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CachePool, PublishError, ReportPublisher};
use crate::engine::emitter::StreamEmitter;
use crate::engine::ingest::{IngestionStatus, IngestionTracker};
use crate::market::{MarketEvent, SymbolState};
use crate::report::builder::BuildParams;
use crate::report::{build_fast_report, build_slow_fields, SlowFields};
use crate::telemetry;

/// Event channel depth per symbol
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Slow-cycle skips per minute that trigger a warning
const SLOW_SKIP_WARN_PER_MIN: u64 = 5;

/// Actor wiring shared by every symbol
#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub node_id: String,
    pub report_period: Duration,
    pub slow_period: Duration,
    pub report_ttl_sec: u64,
    pub build_params: BuildParams,
    pub enable_streams: bool,
}

/// Create the event channel for a symbol before its actor exists
///
/// The adapter subscribes against the sender first; events buffer in the
/// channel until the actor starts draining it.
pub fn symbol_event_channel() -> (mpsc::Sender<MarketEvent>, mpsc::Receiver<MarketEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Handle the supervisor keeps per running actor
pub struct SymbolActorHandle {
    pub symbol: String,

    /// Authoritative fencing token; written only by the assignment
    /// controller, read by the actor under an acquire load
    pub token: Arc<AtomicI64>,

    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SymbolActorHandle {
    /// Stop the actor and wait for it to wind down
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            if !e.is_cancelled() {
                warn!(symbol = %self.symbol, error = %e, "actor join failed");
            }
        }
    }
}

/// Spawn the actor chain for one symbol
pub fn spawn_symbol_actor(
    config: ActorConfig,
    symbol: &str,
    initial_token: i64,
    pool: CachePool,
    events_rx: mpsc::Receiver<MarketEvent>,
    fence_violations: mpsc::Sender<String>,
) -> SymbolActorHandle {
    let token = Arc::new(AtomicI64::new(initial_token));
    let cancel = CancellationToken::new();

    let emitter = if config.enable_streams {
        Some(StreamEmitter::spawn(pool.clone(), symbol, cancel.clone()))
    } else {
        None
    };

    let actor = SymbolActor {
        state: SymbolState::new(symbol, Utc::now().timestamp_millis()),
        publisher: ReportPublisher::new(pool, symbol, config.report_ttl_sec),
        ingestion: IngestionTracker::new(symbol),
        token: Arc::clone(&token),
        config,
        last_slow: None,
        fence_violations,
        emitter,
        skipped_fast: 0,
        slow_skip_window_start: Instant::now(),
        slow_skips_this_window: 0,
    };

    let join = tokio::spawn(actor.run(events_rx, cancel.clone()));

    SymbolActorHandle {
        symbol: symbol.to_string(),
        token,
        cancel,
        join,
    }
}

struct SymbolActor {
    state: SymbolState,
    publisher: ReportPublisher,
    ingestion: IngestionTracker,
    token: Arc<AtomicI64>,
    config: ActorConfig,
    last_slow: Option<SlowFields>,
    fence_violations: mpsc::Sender<String>,
    emitter: Option<mpsc::Sender<MarketEvent>>,
    skipped_fast: u64,
    slow_skip_window_start: Instant,
    slow_skips_this_window: u64,
}

enum CycleOutcome {
    Continue,
    Fenced,
}

impl SymbolActor {
    async fn run(mut self, mut events: mpsc::Receiver<MarketEvent>, cancel: CancellationToken) {
        info!(symbol = %self.state.symbol, "symbol actor started");

        let mut fast = tokio::time::interval(self.config.report_period);
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slow = tokio::time::interval(self.config.slow_period);
        slow.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_fast: Option<Instant> = None;
        let mut last_slow_tick: Option<Instant> = None;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.apply_event(event),
                        None => {
                            debug!(symbol = %self.state.symbol, "event channel closed");
                            break;
                        }
                    }
                }
                tick = fast.tick() => {
                    self.skipped_fast += count_skips(&mut last_fast, tick.into_std(), self.config.report_period);
                    if self.skipped_fast > 0 {
                        telemetry::skipped_cycles(&self.state.symbol, "fast", std::mem::take(&mut self.skipped_fast));
                    }
                    if matches!(self.fast_cycle().await, CycleOutcome::Fenced) {
                        break;
                    }
                }
                tick = slow.tick() => {
                    let skips = count_skips(&mut last_slow_tick, tick.into_std(), self.config.slow_period);
                    self.note_slow_skips(skips);
                    if matches!(self.slow_cycle().await, CycleOutcome::Fenced) {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.publisher.discard_buffer();
        info!(symbol = %self.state.symbol, "symbol actor stopped");
    }

    fn apply_event(&mut self, event: MarketEvent) {
        if let Some(emitter) = &self.emitter {
            // Mirroring is fire-and-forget; a full channel drops the event.
            if emitter.try_send(event.clone()).is_err() {
                telemetry::stream_emit_failure(&self.state.symbol);
            }
        }

        match event {
            MarketEvent::Depth { ts, deltas } => {
                let outcome = self.state.apply_depth(ts, &deltas);
                if outcome.rejected > 0 {
                    telemetry::invalid_events(&self.state.symbol, outcome.rejected);
                    warn!(
                        symbol = %self.state.symbol,
                        rejected = outcome.rejected,
                        "invalid depth deltas dropped"
                    );
                }
                if outcome.crossed {
                    debug!(symbol = %self.state.symbol, "book crossed after update");
                }
            }
            MarketEvent::BookReset { ts, bids, asks } => {
                self.state.apply_book_reset(ts, &bids, &asks);
                info!(
                    symbol = %self.state.symbol,
                    bid_levels = bids.len(),
                    ask_levels = asks.len(),
                    "book reset from snapshot"
                );
            }
            MarketEvent::Trade(tick) => {
                if self.state.apply_trade(tick).is_err() {
                    telemetry::invalid_events(&self.state.symbol, 1);
                }
            }
            MarketEvent::Ticker { ts, stats } => self.state.apply_ticker(ts, stats),
        }
    }

    async fn fast_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let token = self.token.load(Ordering::Acquire);
        let now = Utc::now().timestamp_millis();

        let age = self.state.data_age_ms(now);
        telemetry::data_age(&self.state.symbol, age);

        let mut status = self.ingestion.observe(now, age);
        if self.state.crossed && status == IngestionStatus::Ok {
            // Transiently crossed books surface as degraded without going
            // through the sustain window.
            status = IngestionStatus::Degraded;
        }

        let report = build_fast_report(
            &self.state,
            now,
            &self.config.node_id,
            token,
            status,
            self.last_slow.as_ref(),
        );
        if let Some(spread_bps) = report.spread_bps {
            self.state.record_spread(now, spread_bps);
        }
        telemetry::calc_latency("report", "fast", started.elapsed().as_secs_f64() * 1_000.0);

        // The controller may have moved the token while we computed; the
        // scripted write re-checks it authoritatively in the cache.
        if self.token.load(Ordering::Acquire) != token {
            warn!(symbol = %self.state.symbol, "token changed mid-cycle, aborting publish");
            return CycleOutcome::Continue;
        }

        let result = self.publisher.publish_fast(&report, token).await;
        self.publish_outcome(result).await
    }

    async fn slow_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let token = self.token.load(Ordering::Acquire);
        let now = Utc::now().timestamp_millis();

        // The flash-crash detector reads the freshest observation, so the
        // net-flow history is updated before the detectors run.
        let flow = crate::analytics::calculate_flow(&self.state, now);
        self.state.record_net_flow(now, flow.net_flow);

        let fields = match build_slow_fields(&self.state, now, &self.config.build_params) {
            Ok(fields) => fields,
            Err(e) => {
                // Invariant violation: nothing publishes this cycle.
                error!(symbol = %self.state.symbol, error = %e, "slow cycle aborted");
                return CycleOutcome::Continue;
            }
        };
        self.state.reset_far_level_activity();
        self.last_slow = Some(fields.clone());
        telemetry::calc_latency("report", "slow", started.elapsed().as_secs_f64() * 1_000.0);

        if self.token.load(Ordering::Acquire) != token {
            warn!(symbol = %self.state.symbol, "token changed mid-cycle, aborting merge");
            return CycleOutcome::Continue;
        }

        let result = self.publisher.publish_slow(&fields, token).await;
        self.publish_outcome(result).await
    }

    async fn publish_outcome(&mut self, result: Result<(), PublishError>) -> CycleOutcome {
        match result {
            Ok(()) => CycleOutcome::Continue,
            Err(PublishError::Fenced { symbol }) => {
                // Another writer holds a newer token: stop immediately and
                // let the assignment controller decide what happens next.
                error!(symbol = %symbol, "publish fenced, self-demoting");
                self.publisher.discard_buffer();
                let _ = self.fence_violations.send(symbol).await;
                CycleOutcome::Fenced
            }
            Err(PublishError::Cache(e)) => {
                debug!(symbol = %self.state.symbol, error = %e, "publish deferred");
                CycleOutcome::Continue
            }
        }
    }

    fn note_slow_skips(&mut self, skips: u64) {
        if skips == 0 {
            return;
        }
        telemetry::skipped_cycles(&self.state.symbol, "slow", skips);

        if self.slow_skip_window_start.elapsed() >= Duration::from_secs(60) {
            self.slow_skip_window_start = Instant::now();
            self.slow_skips_this_window = 0;
        }
        self.slow_skips_this_window += skips;
        if self.slow_skips_this_window > SLOW_SKIP_WARN_PER_MIN {
            warn!(
                symbol = %self.state.symbol,
                skips_last_minute = self.slow_skips_this_window,
                "slow cycle falling behind"
            );
        }
    }
}

/// Count ticks lost to an overrunning cycle
///
/// With skip behaviour the timer never fires for missed ticks, so skips are
/// derived from the gap between consecutive firings.
fn count_skips(last: &mut Option<Instant>, tick: Instant, period: Duration) -> u64 {
    let skips = match *last {
        Some(prev) => {
            let gap = tick.saturating_duration_since(prev);
            let periods = (gap.as_millis() / period.as_millis().max(1)) as u64;
            periods.saturating_sub(1)
        }
        None => 0,
    };
    *last = Some(tick);
    skips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_skips_normal_cadence() {
        let period = Duration::from_millis(250);
        let t0 = Instant::now();
        let mut last = None;

        assert_eq!(count_skips(&mut last, t0, period), 0);
        assert_eq!(count_skips(&mut last, t0 + period, period), 0);
        assert_eq!(count_skips(&mut last, t0 + period * 2, period), 0);
    }

    #[test]
    fn test_count_skips_after_overrun() {
        let period = Duration::from_millis(250);
        let t0 = Instant::now();
        let mut last = None;

        count_skips(&mut last, t0, period);
        // A cycle that ran for just over three periods skipped two ticks.
        assert_eq!(count_skips(&mut last, t0 + period * 3, period), 2);
    }

    #[test]
    fn test_count_skips_ignores_sub_period_jitter() {
        let period = Duration::from_millis(250);
        let t0 = Instant::now();
        let mut last = None;

        count_skips(&mut last, t0, period);
        // Firing slightly late is not a skip.
        assert_eq!(
            count_skips(&mut last, t0 + Duration::from_millis(400), period),
            0
        );
    }
}
