//! Standing query manager - long-lived subscriptions pushed to callbacks
//!
//! A single router task reads catalog events and fans matches out to one
//! queue per subscription. Each subscription has its own worker draining
//! that queue, so deliveries to one subscription run one at a time in match
//! order while different subscriptions proceed independently.
//!
//! Subscription states:
//!
//! ```text
//! Active ──(delivery fails)──► Degraded ──(next delivery succeeds)──► Active
//!   │                             │
//!   └──(unregister / shutdown / lifespan end)──► Cancelled (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::callback::{check_reachable, notify_with_retry, Callback, Notified};
use crate::catalog::{CatalogEvent, CatalogRecord, CatalogStore};
use crate::config::StandingQueryConfig;
use crate::error::{FederationError, Result};
use crate::query::{Filter, Query};

/// Cancelled subscriptions kept for status lookups; older ones are dropped
const CANCELLED_HISTORY: usize = 256;

static CANCEL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Optional delivery window; either end may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifespan {
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
}

impl Lifespan {
    pub fn until(stop: DateTime<Utc>) -> Self {
        Self {
            start: None,
            stop: Some(stop),
        }
    }

    pub fn between(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
        }
    }

    pub fn has_started(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start)
    }

    pub fn has_ended(&self, at: DateTime<Utc>) -> bool {
        self.stop.is_some_and(|stop| at >= stop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    Active,
    Degraded,
    Cancelled,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscriptionState::Active => "ACTIVE",
            SubscriptionState::Degraded => "DEGRADED",
            SubscriptionState::Cancelled => "CANCELLED",
        })
    }
}

/// Snapshot of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub id: String,
    pub target: String,
    pub filter: String,
    pub lifespan: Lifespan,
    pub state: SubscriptionState,
    pub delivered: u64,
    /// Matched events whose delivery exhausted its attempts
    pub missed: u64,
    pub last_error: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Published on the failure channel each time a matched event cannot be
/// delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionFailure {
    pub subscription_id: String,
    pub record_id: String,
    pub attempts: u32,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct Subscription {
    id: String,
    filter: Filter,
    lifespan: Lifespan,
    status: Mutex<SubscriptionStatus>,
    queue: Mutex<Option<mpsc::UnboundedSender<Arc<CatalogRecord>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Order of cancellation; 0 while live
    cancelled_seq: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Subscription {
    fn state(&self) -> SubscriptionState {
        locked(&self.status).state
    }

    fn is_cancelled(&self) -> bool {
        self.state() == SubscriptionState::Cancelled
    }

    /// Stop all further deliveries. Returns false if already cancelled.
    fn cancel(&self) -> bool {
        {
            let mut status = locked(&self.status);
            if status.state == SubscriptionState::Cancelled {
                return false;
            }
            status.state = SubscriptionState::Cancelled;
        }
        self.cancelled_seq
            .store(CANCEL_SEQ.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        locked(&self.queue).take();
        if let Some(worker) = locked(&self.worker).take() {
            worker.abort();
        }
        true
    }

    fn enqueue(&self, record: Arc<CatalogRecord>) {
        if let Some(queue) = locked(&self.queue).as_ref() {
            // A closed queue means the worker already stopped
            let _ = queue.send(record);
        }
    }

    fn record_success(&self) {
        let mut status = locked(&self.status);
        status.delivered += 1;
        if status.state == SubscriptionState::Degraded {
            status.state = SubscriptionState::Active;
            info!("Standing query {} recovered", self.id);
        }
    }

    fn record_failure(&self, record_id: &str, attempts: u32, reason: String) -> SubscriptionFailure {
        let mut status = locked(&self.status);
        status.missed += 1;
        status.last_error = Some(reason.clone());
        if status.state == SubscriptionState::Active {
            status.state = SubscriptionState::Degraded;
        }
        SubscriptionFailure {
            subscription_id: self.id.clone(),
            record_id: record_id.to_string(),
            attempts,
            reason,
            at: Utc::now(),
        }
    }
}

struct Registry {
    subscriptions: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl Registry {
    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        locked(&self.subscriptions).values().cloned().collect()
    }

    /// Forget the oldest cancelled subscriptions beyond `CANCELLED_HISTORY`
    fn prune_cancelled(&self) {
        let mut subscriptions = locked(&self.subscriptions);
        let mut cancelled: Vec<(u64, String)> = subscriptions
            .values()
            .filter_map(|subscription| {
                let seq = subscription.cancelled_seq.load(Ordering::SeqCst);
                (seq > 0).then(|| (seq, subscription.id.clone()))
            })
            .collect();
        if cancelled.len() <= CANCELLED_HISTORY {
            return;
        }
        cancelled.sort_unstable();
        let excess = cancelled.len() - CANCELLED_HISTORY;
        for (_, id) in cancelled.into_iter().take(excess) {
            subscriptions.remove(&id);
        }
        debug!("Pruned {} cancelled standing query(ies)", excess);
    }

    /// Queue `event` for every live subscription whose filter matches
    fn dispatch(&self, event: &CatalogEvent) {
        let Some(record) = event.record() else {
            return;
        };
        let now = Utc::now();
        let attributes = record.attributes();

        for subscription in self.snapshot() {
            if subscription.is_cancelled() {
                continue;
            }
            if subscription.lifespan.has_ended(now) {
                if subscription.cancel() {
                    info!("Standing query {} lifespan ended", subscription.id);
                }
                continue;
            }
            if !subscription.lifespan.has_started(now) {
                continue;
            }
            if subscription.filter.matches(&attributes) {
                debug!(
                    "Record {} matches standing query {}",
                    record.id, subscription.id
                );
                subscription.enqueue(record.clone());
            }
        }
    }
}

pub struct StandingQueryMgr {
    registry: Arc<Registry>,
    config: StandingQueryConfig,
    failures: broadcast::Sender<SubscriptionFailure>,
    router: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StandingQueryMgr {
    /// Start routing events from `store`. Must be called inside a Tokio
    /// runtime.
    pub fn new(store: Arc<dyn CatalogStore>, config: StandingQueryConfig) -> Self {
        let (failures, _) = broadcast::channel(config.event_buffer.max(1));
        let registry = Arc::new(Registry {
            subscriptions: Mutex::new(HashMap::new()),
        });
        let router = tokio::spawn(route(store.subscribe(), registry.clone()));
        debug!("Standing query router started on {} catalog", store.name());

        Self {
            registry,
            config,
            failures,
            router: Mutex::new(Some(router)),
            closed: AtomicBool::new(false),
        }
    }

    /// Register `query` for asynchronous delivery to `callback`
    pub async fn register(&self, query: &Query, callback: Arc<dyn Callback>) -> Result<String> {
        self.register_with(query, callback, Lifespan::default())
            .await
    }

    /// Register with a delivery window. Fails with `InvalidQuery` for a bad
    /// filter or a window that is empty or already over, and with
    /// `CallbackUnreachable` if the callback does not answer the ping.
    pub async fn register_with(
        &self,
        query: &Query,
        callback: Arc<dyn Callback>,
        lifespan: Lifespan,
    ) -> Result<String> {
        let filter = query.compile()?;
        if let (Some(start), Some(stop)) = (lifespan.start, lifespan.stop) {
            if stop <= start {
                return Err(FederationError::invalid_query(
                    "lifespan stop must be after its start",
                    0,
                ));
            }
        }
        if lifespan.has_ended(Utc::now()) {
            return Err(FederationError::invalid_query("lifespan has already ended", 0));
        }

        check_reachable(callback.as_ref(), &self.config).await?;

        let target = callback.target();
        let id = uuid::Uuid::new_v4().to_string();
        let (queue, receiver) = mpsc::unbounded_channel();
        let subscription = Arc::new(Subscription {
            id: id.clone(),
            filter,
            lifespan,
            status: Mutex::new(SubscriptionStatus {
                id: id.clone(),
                target: target.clone(),
                filter: query.filter.clone(),
                lifespan,
                state: SubscriptionState::Active,
                delivered: 0,
                missed: 0,
                last_error: None,
                registered_at: Utc::now(),
            }),
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(None),
            cancelled_seq: AtomicU64::new(0),
        });

        {
            // shutdown() sets `closed` before it snapshots the registry, so
            // checking under the registry lock keeps the two consistent
            let mut subscriptions = locked(&self.registry.subscriptions);
            if self.closed.load(Ordering::SeqCst) {
                return Err(FederationError::CatalogUnavailable {
                    reason: "standing query session has ended".to_string(),
                });
            }
            let worker = tokio::spawn(run_worker(
                subscription.clone(),
                callback,
                receiver,
                self.config.clone(),
                self.failures.clone(),
            ));
            *locked(&subscription.worker) = Some(worker);
            subscriptions.insert(id.clone(), subscription);
        }
        self.registry.prune_cancelled();

        info!(
            "Registered standing query {} -> {} ({})",
            id, target, query.filter
        );
        Ok(id)
    }

    /// Cancel a subscription. Unknown or already cancelled ids are a no-op;
    /// returns whether this call did the cancelling.
    pub fn unregister(&self, subscription_id: &str) -> bool {
        let subscription = locked(&self.registry.subscriptions)
            .get(subscription_id)
            .cloned();
        match subscription {
            Some(subscription) if subscription.cancel() => {
                info!("Unregistered standing query {}", subscription_id);
                self.registry.prune_cancelled();
                true
            }
            _ => false,
        }
    }

    /// `None` for unknown ids and for cancelled subscriptions that have
    /// aged out of the history
    pub fn status(&self, subscription_id: &str) -> Option<SubscriptionStatus> {
        locked(&self.registry.subscriptions)
            .get(subscription_id)
            .map(|subscription| locked(&subscription.status).clone())
    }

    /// Every subscription of this session, oldest first
    pub fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        let mut all: Vec<SubscriptionStatus> = self
            .registry
            .snapshot()
            .iter()
            .map(|subscription| locked(&subscription.status).clone())
            .collect();
        all.sort_by_key(|status| status.registered_at);
        all
    }

    /// Failure channel; receives one report per undeliverable event
    pub fn failures(&self) -> broadcast::Receiver<SubscriptionFailure> {
        self.failures.subscribe()
    }

    /// End the session: stop routing and cancel every subscription
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(router) = locked(&self.router).take() {
            router.abort();
        }
        let cancelled = self
            .registry
            .snapshot()
            .iter()
            .filter(|subscription| subscription.cancel())
            .count();
        info!(
            "Standing query session closed ({} subscription(s) cancelled)",
            cancelled
        );
    }
}

impl Drop for StandingQueryMgr {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn route(mut events: broadcast::Receiver<CatalogEvent>, registry: Arc<Registry>) {
    loop {
        match events.recv().await {
            Ok(event) => registry.dispatch(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "Standing query router lagged; {} catalog event(s) were not matched",
                    skipped
                );
            }
            Err(RecvError::Closed) => {
                debug!("Catalog event stream closed");
                break;
            }
        }
    }
}

async fn run_worker(
    subscription: Arc<Subscription>,
    callback: Arc<dyn Callback>,
    mut queue: mpsc::UnboundedReceiver<Arc<CatalogRecord>>,
    config: StandingQueryConfig,
    failures: broadcast::Sender<SubscriptionFailure>,
) {
    loop {
        let record = tokio::select! {
            next = queue.recv() => match next {
                Some(record) => record,
                None => break,
            },
            _ = wait_until(subscription.lifespan.stop) => {
                if subscription.cancel() {
                    info!("Standing query {} lifespan ended", subscription.id);
                }
                break;
            }
        };

        if subscription.is_cancelled() {
            break;
        }
        deliver(&subscription, callback.as_ref(), &record, &config, &failures).await;
    }
    debug!("Standing query worker {} stopped", subscription.id);
}

async fn wait_until(stop: Option<DateTime<Utc>>) {
    match stop {
        Some(stop) => {
            let remaining = (stop - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Push one matched record to the callback. Exhausting the retry budget
/// degrades the subscription and reports on the failure channel; it never
/// cancels it.
async fn deliver(
    subscription: &Subscription,
    callback: &dyn Callback,
    record: &CatalogRecord,
    config: &StandingQueryConfig,
    failures: &broadcast::Sender<SubscriptionFailure>,
) {
    let (attempts, reason) = match record.to_graph(None) {
        Ok(graph) => {
            let outcome = notify_with_retry(callback, &subscription.id, &graph, config, || {
                !subscription.is_cancelled()
            })
            .await;
            match outcome {
                Notified::Delivered { attempts } => {
                    debug!(
                        "Delivered {} to standing query {} ({} attempt(s))",
                        record.id, subscription.id, attempts
                    );
                    subscription.record_success();
                    return;
                }
                Notified::Abandoned => return,
                Notified::Failed { attempts, reason } => (attempts, reason),
            }
        }
        Err(e) => (config.max_attempts.max(1), e.to_string()),
    };

    if subscription.is_cancelled() {
        return;
    }
    let failure = subscription.record_failure(&record.id, attempts, reason);
    warn!(
        "Standing query {} degraded: could not deliver {}: {}",
        failure.subscription_id, failure.record_id, failure.reason
    );
    // Nobody listening on the failure channel is fine
    let _ = failures.send(failure);
}
