//! Change tracker: tails the durable change log and publishes an ordered
//! stream of change records to subscribers.
//!
//! Two background loops mirror the coalesce-then-drain structure of the
//! original engine:
//!
//! - the **trigger loop** (push mode) arms a short one-shot delay when the
//!   notification channel reports any change, coalescing bursts into a
//!   single poll that reads everything past the high-water mark into the
//!   pending queue; without a push channel a fixed-interval **poll loop**
//!   does the same unconditionally;
//! - the **queue loop** fires on a fixed short interval and drains the
//!   pending queue to every subscriber, in strictly increasing record-id
//!   order. With no subscriber registered, records accumulate until one
//!   exists.
//!
//! The high-water mark only advances after a record is safely queued, so a
//! crash between reading and dispatching re-delivers rather than loses;
//! subscribers must tolerate re-processing a record id. Records created
//! before the tracker's own startup are never delivered.
//!
//! The background loops keep the shared state alive, so [`stop`] is part of
//! normal teardown: it cancels both loops (in-flight dispatch completes)
//! and releases their references.
//!
//! [`stop`]: ChangeTracker::stop

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use futures::future::BoxFuture;
use metrics::{gauge, histogram};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, warn};

use crate::application::repos::{ChangeLogRepo, ChangeSignal, RepoError};
use crate::config::TrackerSettings;
use crate::domain::changes::{ChangeRecord, NewChange};
use crate::domain::types::RecordId;

use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::tracker";

const METRIC_CHANGE_QUEUE_LEN: &str = "telaio_change_queue_len";
const METRIC_CHANGE_DISPATCH_MS: &str = "telaio_change_dispatch_ms";

/// Error returned by a subscriber callback; logged and absorbed, never
/// propagated into the dispatch loop.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Subscriber =
    Arc<dyn Fn(ChangeRecord) -> BoxFuture<'static, Result<(), SubscriberError>> + Send + Sync>;

/// Identifies one subscription; pass back to
/// [`ChangeTracker::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Cheap handle over the shared tracker state; clone freely.
#[derive(Clone)]
pub struct ChangeTracker {
    shared: Arc<Shared>,
}

struct Shared {
    log: Arc<dyn ChangeLogRepo>,
    signal: Option<Arc<dyn ChangeSignal>>,
    settings: TrackerSettings,
    subscribers: RwLock<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber_id: AtomicU64,
    pending: Mutex<VecDeque<ChangeRecord>>,
    high_water: AtomicI64,
    init: OnceCell<()>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChangeTracker {
    /// A tracker over `log`, optionally fed by a push notification channel.
    ///
    /// Nothing runs until the first [`subscribe`](Self::subscribe) call.
    pub fn new(
        log: Arc<dyn ChangeLogRepo>,
        signal: Option<Arc<dyn ChangeSignal>>,
        settings: TrackerSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                log,
                signal,
                settings,
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(0),
                pending: Mutex::new(VecDeque::new()),
                high_water: AtomicI64::new(0),
                init: OnceCell::new(),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a consumer of change records.
    ///
    /// The first subscription initializes the tracker exactly once, even
    /// under concurrent first calls: the high-water mark is seeded from the
    /// log's current maximum id and the background loops start.
    pub async fn subscribe<F>(&self, subscriber: F) -> SubscriberId
    where
        F: Fn(ChangeRecord) -> BoxFuture<'static, Result<(), SubscriberError>>
            + Send
            + Sync
            + 'static,
    {
        self.shared.init.get_or_init(|| self.initialize()).await;

        let id = SubscriberId(
            self.shared
                .next_subscriber_id
                .fetch_add(1, Ordering::SeqCst),
        );
        rw_write(&self.shared.subscribers, SOURCE, "subscribe").push((id, Arc::new(subscriber)));
        id
    }

    /// Stop delivering to one consumer; everyone else is unaffected.
    pub fn unsubscribe(&self, id: SubscriberId) {
        rw_write(&self.shared.subscribers, SOURCE, "unsubscribe")
            .retain(|(existing, _)| *existing != id);
    }

    /// Append a change record to the log.
    ///
    /// Notification is asynchronous and decoupled from the write path:
    /// subscribers hear about the record from the dispatch loop, never from
    /// this call.
    pub async fn record_change(&self, change: NewChange) -> Result<RecordId, RepoError> {
        self.shared.log.append(change).await
    }

    /// Cancel both background loops. In-flight dispatch completes; calling
    /// again is a no-op.
    pub fn stop(&self) {
        let _ = self.shared.shutdown.send(true);
    }

    /// The greatest record id already read from the log.
    pub fn high_water(&self) -> RecordId {
        self.shared.high_water.load(Ordering::SeqCst)
    }

    /// Number of records read but not yet dispatched.
    pub fn pending_len(&self) -> usize {
        mutex_lock(&self.shared.pending, SOURCE, "pending_len").len()
    }

    async fn initialize(&self) {
        let push = match &self.shared.signal {
            Some(signal) if self.shared.settings.use_push_notifications => {
                match signal.listen().await {
                    Ok(receiver) => Some(receiver),
                    Err(error) => {
                        debug!(
                            %error,
                            "cannot establish push change notifications, falling back to polling"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        self.shared.seed_high_water().await;

        match push {
            Some(receiver) => self.spawn_trigger_loop(receiver),
            None => self.spawn_poll_loop(),
        }
        self.spawn_queue_loop();
    }

    fn spawn_trigger_loop(&self, mut receiver: mpsc::UnboundedReceiver<()>) {
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shared.shutdown.subscribe();
        let delay = self.shared.settings.trigger_delay;
        let handle = tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    wakeup = receiver.recv() => {
                        if wakeup.is_none() {
                            break;
                        }
                        // Armed at most once: wake-ups that land while the
                        // delay runs are swallowed below, so a burst
                        // produces a single poll.
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = sleep(delay) => {}
                        }
                        while receiver.try_recv().is_ok() {}
                        shared.poll_changes().await;
                    }
                }
            }
        });
        mutex_lock(&self.shared.tasks, SOURCE, "spawn_trigger_loop").push(handle);
    }

    fn spawn_poll_loop(&self) {
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shared.shutdown.subscribe();
        let period = self.shared.settings.poll_interval;
        let handle = tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => shared.poll_changes().await,
                }
            }
        });
        mutex_lock(&self.shared.tasks, SOURCE, "spawn_poll_loop").push(handle);
    }

    fn spawn_queue_loop(&self) {
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shared.shutdown.subscribe();
        let period = self.shared.settings.queue_interval;
        let handle = tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => shared.drain_pending().await,
                }
            }
        });
        mutex_lock(&self.shared.tasks, SOURCE, "spawn_queue_loop").push(handle);
    }
}

impl Shared {
    async fn seed_high_water(&self) {
        match self.log.max_id().await {
            Ok(max) => {
                self.high_water.store(max.unwrap_or(0), Ordering::SeqCst);
            }
            Err(error) => {
                warn!(%error, "failed to seed change high-water mark");
            }
        }
    }

    /// Read everything past the high-water mark into the pending queue.
    ///
    /// Failures are logged and absorbed; the next trigger or tick retries.
    async fn poll_changes(&self) {
        let after = self.high_water.load(Ordering::SeqCst);
        let records = match self.log.query_after(after).await {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, after, "failed to query change log");
                return;
            }
        };
        if records.is_empty() {
            return;
        }

        let mut pending = mutex_lock(&self.pending, SOURCE, "poll_changes");
        for record in records {
            let record_id = record.id;
            pending.push_back(record);
            // Advance the mark only once the record is queued; a crash in
            // between re-delivers, never loses.
            self.high_water.store(record_id, Ordering::SeqCst);
        }
        gauge!(METRIC_CHANGE_QUEUE_LEN).set(pending.len() as f64);
    }

    /// Deliver queued records to every subscriber, oldest first.
    ///
    /// The queue lock is released before callbacks run, so a subscriber is
    /// free to take its own locks. Callback failures are logged per record
    /// and never stop the loop.
    async fn drain_pending(&self) {
        let subscribers: Vec<(SubscriberId, Subscriber)> =
            rw_read(&self.subscribers, SOURCE, "drain_pending").clone();
        if subscribers.is_empty() {
            return;
        }

        loop {
            let record = mutex_lock(&self.pending, SOURCE, "drain_pending").pop_front();
            let Some(record) = record else { break };

            let started = Instant::now();
            for (id, subscriber) in &subscribers {
                if let Err(error) = subscriber(record.clone()).await {
                    warn!(
                        subscriber = id.0,
                        record_id = record.id,
                        %error,
                        "change subscriber failed"
                    );
                }
            }
            histogram!(METRIC_CHANGE_DISPATCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        }
        gauge!(METRIC_CHANGE_QUEUE_LEN).set(0.0);
    }
}
