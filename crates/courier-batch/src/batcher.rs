//! Batcher - per-channel message queues with dual flush triggers
//!
//! Provides:
//! - Lazily-created per-channel queues with a size trigger and a one-shot
//!   time trigger armed by the first message into an empty channel
//! - Bounded concurrent dispatch across registered processors
//! - Periodic sweep of non-empty channels as a safety net
//! - flush / flush_sync / destroy surfaces with aggregate error reporting
//! - A process-wide instance map with singleton semantics

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use courier_common::{BatcherConfig, ErrorInfo, Notification, NotifyLevel, DEFAULT_CHANNEL};

use crate::error::{DispatchError, ProcessorFailure};
use crate::fifo::Fifo;
use crate::processor::{Processor, ProcessorRegistry};

/// Per-channel state: the pending queue, the buffer generation, and the armed
/// one-shot timer, if any.
///
/// The generation stamp lets a fired timer detect that its buffer was already
/// dispatched: a timer only dispatches when the channel still holds the
/// generation it was armed for. Snapshots are therefore always taken under
/// the channel-map lock, and aborting a timer can never cancel a task that
/// holds messages.
struct Channel {
    queue: Fifo<Notification>,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl Channel {
    fn new(epoch: u64) -> Self {
        Self {
            queue: Fifo::new(),
            epoch,
            timer: None,
        }
    }
}

/// Run a single processor against a batch, turning a failure into a
/// `ProcessorFailure` for the caller to collect.
fn run_one_processor<'a>(
    processor: Arc<dyn Processor>,
    batch: &'a [Notification],
) -> Pin<Box<dyn Future<Output = Option<ProcessorFailure>> + Send + 'a>> {
    Box::pin(async move {
        match processor.process_batch(batch).await {
            Ok(()) => None,
            Err(error) => {
                error!(
                    processor = %processor.name(),
                    error = %error,
                    "Processor failed"
                );
                Some(ProcessorFailure {
                    processor: processor.name().to_string(),
                    error,
                })
            }
        }
    })
}

/// Spawn onto the current runtime if one exists. Producers may call the
/// synchronous surfaces from non-runtime threads; timers are then unavailable
/// and callers fall back accordingly.
fn try_spawn<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::runtime::Handle::try_current()
        .ok()
        .map(|handle| handle.spawn(future))
}

/// A concurrent, time-and-size-bounded notification buffer that fans batches
/// out to its registered processors.
pub struct Batcher {
    config: BatcherConfig,
    registry: RwLock<ProcessorRegistry>,
    channels: Mutex<HashMap<String, Channel>>,
    epoch: AtomicU64,
    sweep: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    weak_self: Weak<Batcher>,
}

impl Batcher {
    /// Build a standalone instance. The returned batcher is not registered in
    /// the process-wide map; use [`create_batcher`] for that.
    pub fn new(config: BatcherConfig, processors: Vec<Arc<dyn Processor>>) -> Arc<Self> {
        let mut registry = ProcessorRegistry::new();
        for processor in processors {
            registry.add(processor);
        }

        let batcher = Arc::new_cyclic(|weak| Self {
            config,
            registry: RwLock::new(registry),
            channels: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            sweep: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            weak_self: weak.clone(),
        });

        let sweep = batcher.spawn_sweep();
        if sweep.is_none() {
            warn!(id = %batcher.config.id, "No async runtime, periodic sweep disabled");
        }
        *batcher.sweep.lock() = sweep;

        info!(
            id = %batcher.config.id,
            max_batch_size = batcher.config.max_batch_size,
            max_wait_ms = batcher.config.max_wait_ms,
            concurrent_processors = batcher.config.concurrent_processors,
            "Batcher created"
        );
        batcher
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Messages currently buffered across all channels.
    pub fn pending_count(&self) -> usize {
        self.channels.lock().values().map(|c| c.queue.len()).sum()
    }

    // ------------------------------------------------------------------
    // Processor registry
    // ------------------------------------------------------------------

    pub fn add_processor(&self, processor: Arc<dyn Processor>) {
        self.registry.write().add(processor);
    }

    pub fn remove_processor(&self, name: &str) {
        self.registry.write().remove(name);
    }

    pub fn remove_all_processors(&self) {
        self.registry.write().clear();
    }

    pub fn processor_count(&self) -> usize {
        self.registry.read().len()
    }

    // ------------------------------------------------------------------
    // Producer entry points (fire-and-forget; errors surface via flush)
    // ------------------------------------------------------------------

    pub fn info(&self, text: impl Into<String>) {
        self.queue_message(text, NotifyLevel::Info, None);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.queue_message(text, NotifyLevel::Warning, None);
    }

    pub fn error(&self, text: impl Into<String>, error: Option<ErrorInfo>) {
        self.queue_message(text, NotifyLevel::Error, error);
    }

    pub fn queue_message(
        &self,
        text: impl Into<String>,
        level: NotifyLevel,
        error: Option<ErrorInfo>,
    ) {
        self.queue_message_for(DEFAULT_CHANNEL, text, level, error);
    }

    /// Route a message to an explicit channel.
    ///
    /// If the channel reaches `max_batch_size` the armed timer is cancelled
    /// and the channel dispatches immediately; otherwise the first message
    /// into an empty channel arms a one-shot timer for `max_wait_ms`. The
    /// timer does not restart on subsequent enqueues, which bounds latency to
    /// `max_wait_ms` from the first message of the current batch.
    pub fn queue_message_for(
        &self,
        channel: impl Into<String>,
        text: impl Into<String>,
        level: NotifyLevel,
        error: Option<ErrorInfo>,
    ) {
        if self.is_destroyed() {
            warn!(id = %self.config.id, "Batcher destroyed, dropping message");
            return;
        }

        let channel = channel.into();
        let message = Notification {
            channel: channel.clone(),
            text: text.into(),
            level,
            error,
        };

        let can_spawn = tokio::runtime::Handle::try_current().is_ok();
        let ready: Option<Vec<Notification>> = {
            let mut channels = self.channels.lock();
            let entry = channels.entry(channel.clone()).or_insert_with(|| {
                Channel::new(self.epoch.fetch_add(1, Ordering::Relaxed))
            });
            entry.queue.enqueue(message);

            let full = entry.queue.len() >= self.config.max_batch_size;
            if !full && entry.timer.is_none() {
                entry.timer = self.arm_timer(&channel, entry.epoch);
                if entry.timer.is_none() {
                    warn!(
                        channel = %channel,
                        "No async runtime, time trigger disabled for this batch"
                    );
                }
            }

            if full && can_spawn {
                let mut entry = channels.remove(&channel).expect("channel entry exists");
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                Some(entry.queue.take_all())
            } else {
                if full {
                    warn!(
                        channel = %channel,
                        "No async runtime, size-triggered dispatch deferred to flush"
                    );
                }
                None
            }
        };

        if let Some(batch) = ready {
            self.spawn_dispatch(channel, batch);
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// One-shot timer for a channel's current buffer generation. Holds a weak
    /// reference so an armed timer never keeps a dropped batcher alive.
    fn arm_timer(&self, channel: &str, epoch: u64) -> Option<JoinHandle<()>> {
        let weak = self.weak_self.clone();
        let channel = channel.to_string();
        let wait = self.config.max_wait();

        try_spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(batcher) = weak.upgrade() else { return };
            batcher.dispatch_expired(&channel, epoch).await;
        })
    }

    /// Timer path: dispatch only when the channel still holds the generation
    /// this timer was armed for. A mismatch means the buffer was already
    /// dispatched by the size trigger, a flush, or the sweep.
    async fn dispatch_expired(&self, channel: &str, epoch: u64) {
        let batch = {
            let mut channels = self.channels.lock();
            if channels.get(channel).map(|entry| entry.epoch) != Some(epoch) {
                return;
            }
            let mut entry = channels.remove(channel).expect("generation matched");
            entry.timer = None;
            entry.queue.take_all()
        };

        if let Err(err) = self.run_batch(channel, &batch).await {
            error!(channel = %channel, error = %err, "Timed dispatch failed");
        }
    }

    fn spawn_dispatch(&self, channel: String, batch: Vec<Notification>) {
        let weak = self.weak_self.clone();
        try_spawn(async move {
            let Some(batcher) = weak.upgrade() else { return };
            if let Err(err) = batcher.run_batch(&channel, &batch).await {
                error!(channel = %channel, error = %err, "Batch dispatch failed");
            }
        });
    }

    /// Detach the channel's queue as an ordered snapshot. The channel entry
    /// is removed wholesale; it reappears on the next enqueue.
    fn snapshot_channel(&self, channel: &str) -> Vec<Notification> {
        let mut channels = self.channels.lock();
        match channels.remove(channel) {
            Some(mut entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                entry.queue.take_all()
            }
            None => Vec::new(),
        }
    }

    async fn dispatch(&self, channel: &str) -> Result<(), DispatchError> {
        let batch = self.snapshot_channel(channel);
        self.run_batch(channel, &batch).await
    }

    async fn run_batch(&self, channel: &str, batch: &[Notification]) -> Result<(), DispatchError> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            id = %self.config.id,
            channel = %channel,
            batch_size = batch.len(),
            "Dispatching batch"
        );
        self.run_processors(batch).await
    }

    /// Fan a batch out to every registered processor, capping in-flight
    /// invocations at `concurrent_processors`. Failures are collected in
    /// registry order without short-circuiting.
    async fn run_processors(&self, batch: &[Notification]) -> Result<(), DispatchError> {
        let processors = self.registry.read().processors();
        if processors.is_empty() {
            debug!(id = %self.config.id, "No processors registered, dropping batch");
            return Ok(());
        }

        let limit = self.config.concurrent_processors.max(1);
        let mut pending: Vec<_> = processors
            .into_iter()
            .map(|processor: Arc<dyn Processor>| run_one_processor(processor, batch))
            .collect();
        let futures: Pin<Box<dyn Stream<Item = Option<ProcessorFailure>> + Send>> =
            Box::pin(stream::iter(pending.drain(..)).buffered(limit));
        let failures: Vec<ProcessorFailure> = futures.filter_map(|outcome| async move { outcome }).collect().await;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::new(failures))
        }
    }

    // ------------------------------------------------------------------
    // Flush surfaces
    // ------------------------------------------------------------------

    /// Dispatch every currently non-empty channel, completing when all
    /// dispatches complete. Per-processor failures across channels are
    /// flattened into one aggregate error.
    pub async fn flush(&self) -> Result<(), DispatchError> {
        let channels: Vec<String> = self.channels.lock().keys().cloned().collect();
        let mut errors = Vec::new();
        for channel in channels {
            if let Err(err) = self.dispatch(&channel).await {
                errors.push(err);
            }
        }
        DispatchError::merge(errors)
    }

    /// Dispatch every non-empty channel without suspending.
    ///
    /// Processors with a synchronous path run inline and their failures are
    /// aggregated; the rest have their async path fired without awaiting
    /// completion, so their failures surface only in logs.
    pub fn flush_sync(&self) -> Result<(), DispatchError> {
        let drained: Vec<Vec<Notification>> = {
            let mut channels = self.channels.lock();
            channels
                .drain()
                .map(|(_, mut entry)| {
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                    }
                    entry.queue.take_all()
                })
                .collect()
        };

        let processors = self.registry.read().processors();
        let mut failures = Vec::new();

        for batch in drained {
            if batch.is_empty() {
                continue;
            }
            let batch = Arc::new(batch);
            for processor in &processors {
                match processor.process_batch_sync(&batch) {
                    Some(Ok(())) => {}
                    Some(Err(error)) => {
                        error!(
                            processor = %processor.name(),
                            error = %error,
                            "Processor failed"
                        );
                        failures.push(ProcessorFailure {
                            processor: processor.name().to_string(),
                            error,
                        });
                    }
                    None => {
                        let processor = Arc::clone(processor);
                        let batch = Arc::clone(&batch);
                        let spawned = try_spawn(async move {
                            if let Err(error) = processor.process_batch(&batch).await {
                                error!(
                                    processor = %processor.name(),
                                    error = %error,
                                    "Processor failed"
                                );
                            }
                        });
                        if spawned.is_none() {
                            warn!("No async runtime available for synchronous flush fallback");
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::new(failures))
        }
    }

    /// Tear the batcher down: cancel all timers, flush what remains, clear
    /// the registry and queues, and deregister from the process-wide map.
    /// Always completes; flush failures are logged and suppressed.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(id = %self.config.id, "Destroying batcher");

        if let Some(sweep) = self.sweep.lock().take() {
            sweep.abort();
        }
        {
            let mut channels = self.channels.lock();
            for entry in channels.values_mut() {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
            }
        }

        if let Err(error) = self.flush().await {
            error!(
                id = %self.config.id,
                error = %error,
                "Error processing remaining messages during destroy"
            );
        }

        self.registry.write().clear();
        self.channels.lock().clear();

        if let Some(me) = self.weak_self.upgrade() {
            instances().remove_if(&self.config.id, |_, existing| Arc::ptr_eq(existing, &me));
        }
    }

    // ------------------------------------------------------------------
    // Periodic sweep
    // ------------------------------------------------------------------

    /// Safety net for channels whose timer was lost: every `max_wait_ms`,
    /// dispatch whatever is non-empty. Idempotent with respect to per-channel
    /// timers, since dispatch snapshots and cancels them.
    fn spawn_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let weak = Arc::downgrade(self);
        let period = self.config.max_wait().max(Duration::from_millis(1));

        try_spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick resolves immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(batcher) = weak.upgrade() else { break };
                if let Err(error) = batcher.flush().await {
                    warn!(id = %batcher.config.id, error = %error, "Sweep dispatch failed");
                }
            }
        })
    }
}

// ============================================================================
// Process-wide instance map
// ============================================================================

static INSTANCES: OnceLock<DashMap<String, Arc<Batcher>>> = OnceLock::new();

fn instances() -> &'static DashMap<String, Arc<Batcher>> {
    INSTANCES.get_or_init(DashMap::new)
}

/// Create a batcher, or return the existing instance registered under
/// `config.id` when `config.singleton` is set.
pub fn create_batcher(config: BatcherConfig) -> Arc<Batcher> {
    create_batcher_with(config, Vec::new())
}

/// [`create_batcher`] with an initial processor set.
pub fn create_batcher_with(
    config: BatcherConfig,
    processors: Vec<Arc<dyn Processor>>,
) -> Arc<Batcher> {
    let map = instances();
    if !map.is_empty() {
        warn!(existing = map.len(), "Batcher instance(s) already exist");
    }

    if config.singleton {
        if let Some(existing) = map.get(&config.id) {
            warn!(id = %config.id, "Reusing existing batcher, new configuration ignored");
            return Arc::clone(existing.value());
        }
    }

    let batcher = Batcher::new(config, processors);
    map.insert(batcher.id().to_string(), Arc::clone(&batcher));
    batcher
}

/// Look up a live batcher by id.
pub fn get_batcher(id: &str) -> Option<Arc<Batcher>> {
    instances().get(id).map(|entry| Arc::clone(entry.value()))
}
