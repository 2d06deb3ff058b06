//! Per-subscription refresh + tick loop.
//!
//! Each (account, token) subscription runs on its own task and owns its flow
//! store, snapshot cache and engine. Fetch completions and ticks are handled in
//! one `select!` loop, so mutations of the displayed balance never interleave.
//! A fetch is polled alongside the ticker and never blocks it.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::Address;
use futures_util::future::{BoxFuture, FutureExt, OptionFuture};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::compute_netflow_set;
use crate::clock::Clock;
use crate::engine::{BalanceAction, EngineSettings, InterpolationEngine, Outcome};
use crate::error::FetchError;
use crate::models::{BalanceSnapshot, FlowSet, NetflowEntry, TokenId};
use crate::observer::BalanceObserver;
use crate::snapshot::SnapshotCache;
use crate::source::BalanceSource;
use crate::store::FlowStore;

/// Results of one authoritative refresh
#[derive(Debug)]
pub struct Refresh {
    pub flows: Result<FlowSet, FetchError>,
    pub balance: Result<BalanceSnapshot, FetchError>,
}

async fn fetch(source: Arc<dyn BalanceSource>, account: Address, token: TokenId) -> Refresh {
    let flows = source.fetch_flows(&account, std::slice::from_ref(&token)).await;
    let balance = source.fetch_balance(&account, &token).await;
    Refresh { flows, balance }
}

/// State owned by one subscription
pub struct Subscription {
    token_id: TokenId,
    store: FlowStore,
    snapshots: SnapshotCache,
    netflow: NetflowEntry,
    engine: InterpolationEngine,
    observers: Vec<Arc<dyn BalanceObserver>>,
    last_tick: Option<Instant>,
}

impl Subscription {
    pub fn new(account: Address, token_id: impl Into<TokenId>, settings: EngineSettings) -> Self {
        let token_id = token_id.into().to_lowercase();
        Self {
            store: FlowStore::new(account),
            snapshots: SnapshotCache::new(),
            netflow: NetflowEntry::zero(&token_id),
            engine: InterpolationEngine::new(token_id.clone(), settings),
            observers: Vec::new(),
            last_tick: None,
            token_id,
        }
    }

    pub fn observe(mut self, observer: Arc<dyn BalanceObserver>) -> Self {
        self.engine.subscribe(Arc::clone(&observer));
        self.observers.push(observer);
        self
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn engine(&self) -> &InterpolationEngine {
        &self.engine
    }

    pub fn netflow(&self) -> &NetflowEntry {
        &self.netflow
    }

    pub fn snapshot(&self) -> Option<&BalanceSnapshot> {
        self.snapshots.get(&self.token_id)
    }

    /// Apply a finished refresh. Returns true when the tick cadence changed.
    pub fn handle_refresh(&mut self, refresh: Refresh, now: Instant) -> bool {
        let mut cadence_changed = false;

        match refresh.flows {
            Ok(flows) => {
                self.store.replace(flows);
                let netflows = compute_netflow_set(
                    self.store.current(),
                    self.store.account(),
                    [self.token_id.as_str()],
                );
                self.netflow = netflows
                    .get(&self.token_id)
                    .cloned()
                    .unwrap_or_else(|| NetflowEntry::zero(&self.token_id));
                cadence_changed = self.engine.set_net_rate(self.netflow.net_rate);

                let token = self.store.token(&self.token_id);
                for observer in &self.observers {
                    observer.on_netflow(&self.netflow, token);
                }
            }
            Err(e) => warn!("Flow refresh failed for {}: {}", self.token_id, e),
        }

        match refresh.balance {
            Ok(snapshot) => {
                match self
                    .snapshots
                    .update_snapshot(&self.token_id, snapshot.raw_balance, snapshot.observed_at)
                {
                    Ok(accepted) => {
                        let outcome = self.engine.apply(BalanceAction::Resync(accepted));
                        if matches!(outcome, Outcome::Initialized | Outcome::HardResync { .. }) {
                            self.last_tick = Some(now);
                        }
                    }
                    Err(stale) => debug!("{}", stale),
                }
            }
            Err(e) => warn!(
                "Balance refresh failed for {}: {} (keeping last snapshot)",
                self.token_id, e
            ),
        }

        cadence_changed
    }

    /// Advance by the time elapsed since the previous tick
    pub fn handle_tick(&mut self, now: Instant) -> Outcome {
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        self.engine.apply(BalanceAction::Tick(elapsed))
    }

    pub fn cancel(&mut self) {
        self.engine.cancel();
        self.observers.clear();
    }

    /// Start the refresh and tick timers on a new task
    pub fn spawn(self, source: Arc<dyn BalanceSource>, clock: Arc<dyn Clock>) -> SubscriptionHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let token_id = self.token_id.clone();
        let task = tokio::spawn(self.run(source, clock, cancel_rx));
        SubscriptionHandle {
            token_id,
            cancel: Some(cancel_tx),
            task: Some(task),
        }
    }

    fn ticker(&self) -> Interval {
        let settings = self.engine.settings();
        let period = settings.period(self.engine.cadence());
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn run(
        mut self,
        source: Arc<dyn BalanceSource>,
        clock: Arc<dyn Clock>,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let account = *self.store.account();
        let mut refresh = interval(self.engine.settings().refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticker = self.ticker();
        let mut in_flight: Option<BoxFuture<'static, Refresh>> = None;

        info!("Subscription {} started for {}", self.token_id, account);

        loop {
            tokio::select! {
                biased;

                _ = &mut cancel => break,

                Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    if self.handle_refresh(result, clock.now()) {
                        ticker = self.ticker();
                    }
                }

                _ = ticker.tick() => {
                    self.handle_tick(clock.now());
                }

                _ = refresh.tick(), if in_flight.is_none() => {
                    in_flight = Some(fetch(Arc::clone(&source), account, self.token_id.clone()).boxed());
                }
            }
        }

        // dropping the in-flight fetch discards its completion
        drop(in_flight);
        self.cancel();
        info!("Subscription {} stopped", self.token_id);
    }
}

/// Owning handle to a running subscription. Dropping it cancels the subscription.
pub struct SubscriptionHandle {
    token_id: TokenId,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// Stop timers and ignore any in-flight fetch
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Cancel and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Subscription {} task failed: {:?}", self.token_id, e);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
