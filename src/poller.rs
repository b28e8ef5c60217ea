//! Interval-driven fetch → decode → merge loop over the configured contracts.
//!
//! All contracts are polled from one task. Their requests run as interleaved
//! futures; decoding and merging happen synchronously between suspension
//! points, so snapshot readers only ever see whole merges.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::abi::ROLL_TOPIC;
use crate::api::{LogQuery, LogSource};
use crate::config::AppConfig;
use crate::decoder::decode_batch;
use crate::error::FetchError;
use crate::store::ReconciliationStore;
use crate::types::{
    ContractConfig, ContractStatus, CycleState, FeedSnapshot, FeedStatus, FeedUpdate, GameEvent,
    RawLog,
};

/// Base backoff delay after repeated failures (doubles each failure).
const BASE_BACKOFF: Duration = Duration::from_millis(500);

type CycleResult = (Address, Result<Vec<RawLog>, FetchError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Bound on one whole `fetch_logs` call, all pages included.
    pub fetch_timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            fetch_timeout: config.cycle_timeout(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Extra delay before a failing contract is polled again.
///
/// The first failure retries on the next tick. From the second consecutive
/// failure on, the delay doubles from [`BASE_BACKOFF`] and is capped at the
/// polling interval.
pub fn backoff_delay(consecutive_failures: u32, interval: Duration) -> Duration {
    if consecutive_failures < 2 {
        return Duration::ZERO;
    }
    let exp = (consecutive_failures - 2).min(16);
    BASE_BACKOFF.saturating_mul(2u32.pow(exp)).min(interval)
}

struct ContractTracker {
    contract: ContractConfig,
    state: CycleState,
    completed_first_cycle: bool,
    consecutive_failures: u32,
    started_at: Option<Instant>,
    retry_at: Option<Instant>,
}

impl ContractTracker {
    fn new(contract: ContractConfig) -> Self {
        Self {
            contract,
            state: CycleState::Idle,
            completed_first_cycle: false,
            consecutive_failures: 0,
            started_at: None,
            retry_at: None,
        }
    }
}

/// Drives the event feed for a set of contracts.
pub struct Poller<S> {
    source: Arc<S>,
    settings: PollSettings,
    trackers: Vec<ContractTracker>,
    store: ReconciliationStore,
    ever_succeeded: bool,
    error: Option<String>,
    events: Arc<Vec<GameEvent>>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    update_tx: Option<mpsc::UnboundedSender<FeedUpdate>>,
}

async fn fetch_with_timeout<S: LogSource>(
    source: Arc<S>,
    query: LogQuery,
    timeout: Duration,
) -> CycleResult {
    let result = match tokio::time::timeout(timeout, source.fetch_logs(&query)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    (query.contract, result)
}

impl<S: LogSource + 'static> Poller<S> {
    pub fn new(source: Arc<S>, contracts: Vec<ContractConfig>, settings: PollSettings) -> Self {
        let trackers: Vec<ContractTracker> = contracts.into_iter().map(ContractTracker::new).collect();
        let events = Arc::new(Vec::new());
        let (snapshot_tx, _) = watch::channel(FeedSnapshot {
            events: Arc::clone(&events),
            status: FeedStatus {
                loading: true,
                error: None,
                contracts: Vec::new(),
            },
        });

        let poller = Self {
            source,
            settings,
            trackers,
            store: ReconciliationStore::new(),
            ever_succeeded: false,
            error: None,
            events,
            snapshot_tx,
            update_tx: None,
        };
        poller.publish();
        poller
    }

    /// Also emit a [`FeedUpdate`] for every completed cycle.
    pub fn with_updates(mut self, update_tx: mpsc::UnboundedSender<FeedUpdate>) -> Self {
        self.update_tx = Some(update_tx);
        self
    }

    /// Receiver for the snapshot published after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            events: Arc::clone(&self.events),
            status: self.status(),
        }
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Requests still in flight at shutdown are dropped and their results
    /// never reach the store.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: FuturesUnordered<LocalBoxFuture<'static, CycleResult>> =
            FuturesUnordered::new();
        tokio::pin!(shutdown);

        info!(
            contracts = self.trackers.len(),
            interval_secs = self.settings.interval.as_secs_f64(),
            "starting event poller"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    if !in_flight.is_empty() {
                        info!(in_flight = in_flight.len(), "discarding in-flight log requests");
                    }
                    break;
                }
                Some((contract, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    self.finish_cycle(contract, result);
                }
                tick_at = ticker.tick() => {
                    let queries = self.begin_due_cycles(tick_at);
                    if queries.is_empty() {
                        continue;
                    }
                    for query in queries {
                        let fut = fetch_with_timeout(
                            Arc::clone(&self.source),
                            query,
                            self.settings.fetch_timeout,
                        );
                        in_flight.push(fut.boxed_local());
                    }
                    self.publish();
                }
            }
        }

        info!(events = self.store.len(), "event poller stopped");
    }

    /// Move every idle, non-backed-off contract to `Fetching` and return the
    /// queries to issue.
    fn begin_due_cycles(&mut self, now: Instant) -> Vec<LogQuery> {
        let mut queries = Vec::new();

        for tracker in &mut self.trackers {
            let contract = tracker.contract.address;
            if tracker.state != CycleState::Idle {
                debug!(%contract, name = %tracker.contract.name, "previous cycle still in flight");
                continue;
            }
            if tracker.retry_at.is_some_and(|at| now < at) {
                debug!(
                    %contract,
                    name = %tracker.contract.name,
                    failures = tracker.consecutive_failures,
                    "backing off"
                );
                continue;
            }

            tracker.state = CycleState::Fetching;
            tracker.started_at = Some(now);
            queries.push(LogQuery {
                contract,
                topic0: ROLL_TOPIC,
                from_block: self.store.next_from_block(contract),
            });
        }

        queries
    }

    fn finish_cycle(&mut self, contract: Address, result: Result<Vec<RawLog>, FetchError>) {
        let Some(idx) = self.trackers.iter().position(|t| t.contract.address == contract) else {
            warn!(%contract, "result for unknown contract");
            return;
        };
        let game = self.trackers[idx].contract.game;

        match result {
            Ok(raws) => {
                self.trackers[idx].state = CycleState::Decoding;
                let batch = decode_batch(&raws, contract, game);

                self.trackers[idx].state = CycleState::Merging;
                let outcome = self.store.merge(contract, batch.events);

                let tracker = &mut self.trackers[idx];
                tracker.state = CycleState::Idle;
                tracker.completed_first_cycle = true;
                tracker.consecutive_failures = 0;
                tracker.retry_at = None;
                self.ever_succeeded = true;
                self.error = None;

                if outcome.added.is_empty() {
                    debug!(
                        %contract,
                        %game,
                        duplicates = outcome.duplicates,
                        skipped = batch.failures.len(),
                        "no new bets"
                    );
                } else {
                    info!(
                        %contract,
                        %game,
                        new = outcome.added.len(),
                        duplicates = outcome.duplicates,
                        skipped = batch.failures.len(),
                        high_water_mark = ?outcome.high_water_mark,
                        "merged new bets"
                    );
                    self.events = Arc::new(self.store.events().to_vec());
                    if let Some(tx) = &self.update_tx {
                        let _ = tx.send(FeedUpdate::NewEvents {
                            contract,
                            game,
                            events: outcome.added,
                        });
                    }
                }
            }
            Err(error) => {
                let interval = self.settings.interval;
                let tracker = &mut self.trackers[idx];
                tracker.state = CycleState::Idle;
                tracker.completed_first_cycle = true;
                tracker.consecutive_failures += 1;
                let started_at = tracker.started_at.unwrap_or_else(Instant::now);
                tracker.retry_at = Some(
                    started_at + interval + backoff_delay(tracker.consecutive_failures, interval),
                );
                let failures = tracker.consecutive_failures;

                if self.ever_succeeded {
                    debug!(%contract, %game, failures, error = %error, "background refresh failed, keeping previous data");
                } else {
                    warn!(%contract, %game, failures, error = %error, "failed to load recent bets");
                    self.error = Some(format!("temporarily unable to load recent bets: {error}"));
                }

                if let Some(tx) = &self.update_tx {
                    let _ = tx.send(FeedUpdate::CycleFailed {
                        contract,
                        game,
                        error: error.to_string(),
                    });
                }
            }
        }

        self.publish();
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            loading: !self.trackers.iter().all(|t| t.completed_first_cycle),
            error: self.error.clone(),
            contracts: self
                .trackers
                .iter()
                .map(|t| ContractStatus {
                    name: t.contract.name.clone(),
                    contract: t.contract.address,
                    game: t.contract.game,
                    state: t.state,
                    high_water_mark: self.store.high_water_mark(t.contract.address),
                    consecutive_failures: t.consecutive_failures,
                })
                .collect(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
