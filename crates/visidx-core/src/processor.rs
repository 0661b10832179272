//! Asynchronous batch processor for bulk operations.
//!
//! [`BulkProcessor`] is the seam the visibility store submits through: `add`
//! enqueues one operation under a task key and returns an [`AckHandle`] that
//! resolves once the operation is committed (`true`) or given up on (`false`).
//!
//! [`BatchProcessor`] is the in-tree implementation. A single collector task
//! accumulates operations and cuts a batch when any of these trips:
//!
//! - `bulk_actions` operations are queued
//! - the rendered batch reaches `bulk_size_bytes`
//! - `flush_interval` elapses with a non-empty batch
//! - `flush()` or `stop()` is called
//!
//! Batches are committed by at most `num_workers` concurrent worker tasks.
//! Item results are classified per operation; transient failures are retried
//! with backoff and only the failed items are resubmitted.
//!
//! A second add of the same write (same task key, action, document id and
//! version) while the first is pending joins it instead of queueing again.
//! Any other add is its own write, even under a task key already pending.
//!
//! `add` never waits. At most `max_pending` distinct writes are held (queued
//! or in flight); adds past that resolve `false` at once, so a slow backend
//! pushes back on callers instead of growing the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backend::{
    BulkClient, BulkItemResult, STATUS_CONFLICT, STATUS_NOT_FOUND, STATUS_TOO_MANY_REQUESTS,
};
use crate::config::ProcessorConfig;
use crate::operation::{BulkOperation, BulkRequestType, VisibilityTaskKey};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Acknowledgments
// ---------------------------------------------------------------------------

/// Completion signal for one submitted operation.
#[derive(Debug)]
pub struct AckHandle {
    rx: oneshot::Receiver<bool>,
}

/// Producer side of an [`AckHandle`].
#[derive(Debug)]
pub struct AckSender {
    tx: oneshot::Sender<bool>,
}

impl AckHandle {
    /// Linked sender and handle.
    #[must_use]
    pub fn pair() -> (AckSender, Self) {
        let (tx, rx) = oneshot::channel();
        (AckSender { tx }, Self { rx })
    }

    /// Handle that is already resolved.
    #[must_use]
    pub fn resolved(outcome: bool) -> Self {
        let (sender, handle) = Self::pair();
        sender.resolve(outcome);
        handle
    }

    /// Wait for the outcome. `None` means the sender was dropped unresolved.
    pub async fn wait(self) -> Option<bool> {
        self.rx.await.ok()
    }
}

impl AckSender {
    /// Resolve the paired handle. A handle nobody waits on anymore is ignored.
    pub fn resolve(self, outcome: bool) {
        let _ = self.tx.send(outcome);
    }
}

/// Accepts bulk operations for asynchronous commit.
pub trait BulkProcessor: Send + Sync {
    /// Enqueue `operation` under `task_key`. Never blocks on the backend.
    fn add(&self, operation: BulkOperation, task_key: VisibilityTaskKey) -> AckHandle;
}

impl<T: BulkProcessor + ?Sized> BulkProcessor for Arc<T> {
    fn add(&self, operation: BulkOperation, task_key: VisibilityTaskKey) -> AckHandle {
        (**self).add(operation, task_key)
    }
}

// ---------------------------------------------------------------------------
// Item classification
// ---------------------------------------------------------------------------

/// What a backend item result means for the submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed,
    Retry,
    Failed,
}

/// Classify one item result.
///
/// A version conflict means a newer or equal version is already stored, so
/// the write is superseded rather than lost. Deleting a missing document
/// leaves the index in the requested state.
#[must_use]
pub fn classify(request_type: BulkRequestType, result: &BulkItemResult) -> ItemOutcome {
    match result.status {
        200..=299 | STATUS_CONFLICT => ItemOutcome::Committed,
        STATUS_NOT_FOUND if request_type == BulkRequestType::Delete => ItemOutcome::Committed,
        STATUS_TOO_MANY_REQUESTS | 500..=599 => ItemOutcome::Retry,
        _ => ItemOutcome::Failed,
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    deduplicated: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    batches: AtomicU64,
}

/// Snapshot of processor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Operations accepted by `add`, duplicates included
    pub added: u64,
    /// Adds that joined an identical pending write
    pub deduplicated: u64,
    /// Operations acknowledged `true`
    pub committed: u64,
    /// Operations acknowledged `false`, rejected adds included
    pub failed: u64,
    /// Item resubmissions
    pub retried: u64,
    /// Batches handed to workers
    pub batches: u64,
}

impl Counters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            added: self.added.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// BatchProcessor
// ---------------------------------------------------------------------------

/// Identity of one write awaiting its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    task_key: VisibilityTaskKey,
    request_type: BulkRequestType,
    doc_id: String,
    version: i64,
}

impl PendingKey {
    fn new(operation: &BulkOperation, task_key: VisibilityTaskKey) -> Self {
        Self {
            task_key,
            request_type: operation.request_type,
            doc_id: operation.id.clone(),
            version: operation.version,
        }
    }
}

type PendingAcks = Arc<Mutex<HashMap<PendingKey, Vec<AckSender>>>>;

enum Command {
    Add(BulkOperation, PendingKey),
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// State shared by the processor handle, the collector and the workers.
struct Shared {
    client: Arc<dyn BulkClient>,
    policy: RetryPolicy,
    pending: PendingAcks,
    counters: Arc<Counters>,
}

impl Shared {
    /// Resolve every handle waiting on `key`.
    fn resolve(&self, key: &PendingKey, outcome: bool) {
        let waiters = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .unwrap_or_default();
        let counter = if outcome {
            &self.counters.committed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(waiters.len() as u64, Ordering::Relaxed);
        for waiter in waiters {
            waiter.resolve(outcome);
        }
    }

    /// Fail every handle still pending (shutdown path).
    fn fail_all_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (key, waiters) in drained {
            warn!(
                task_key = %key.task_key,
                version = key.version,
                "Operation still pending at shutdown"
            );
            self.counters
                .failed
                .fetch_add(waiters.len() as u64, Ordering::Relaxed);
            for waiter in waiters {
                waiter.resolve(false);
            }
        }
    }
}

/// Batching, deduplicating, retrying [`BulkProcessor`].
pub struct BatchProcessor {
    tx: mpsc::UnboundedSender<Command>,
    pending: PendingAcks,
    max_pending: usize,
    counters: Arc<Counters>,
    stopped: AtomicBool,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Spawn the collector on the current tokio runtime.
    pub fn start(config: ProcessorConfig, client: Arc<dyn BulkClient>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: PendingAcks = Arc::default();
        let counters = Arc::new(Counters::default());
        let shared = Arc::new(Shared {
            client,
            policy: RetryPolicy::from_processor(&config),
            pending: Arc::clone(&pending),
            counters: Arc::clone(&counters),
        });

        info!(
            num_workers = config.num_workers,
            bulk_actions = config.bulk_actions,
            bulk_size_bytes = config.bulk_size_bytes,
            flush_interval_ms = config.flush_interval_ms,
            max_pending = config.max_pending,
            "Bulk processor started"
        );
        let max_pending = config.max_pending.max(1);
        let collector = tokio::spawn(Collector::new(config, shared).run(rx));

        Self {
            tx,
            pending,
            max_pending,
            counters,
            stopped: AtomicBool::new(false),
            collector: Mutex::new(Some(collector)),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot()
    }

    /// Number of distinct writes awaiting an outcome.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cut the current batch and wait until every dispatched batch finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Commit everything queued, wait for in-flight batches, then shut down.
    ///
    /// Adds after `stop` resolve `false` immediately.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Stop(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let handle = self
            .collector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Bulk processor collector ended abnormally");
            }
        }
        info!(stats = ?self.stats(), "Bulk processor stopped");
    }

    fn reject(&self, task_key: &VisibilityTaskKey, reason: &'static str) -> AckHandle {
        warn!(task_key = %task_key, reason, "Operation rejected");
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        AckHandle::resolved(false)
    }
}

impl BulkProcessor for BatchProcessor {
    fn add(&self, operation: BulkOperation, task_key: VisibilityTaskKey) -> AckHandle {
        if self.stopped.load(Ordering::SeqCst) {
            return self.reject(&task_key, "processor stopped");
        }
        self.counters.added.fetch_add(1, Ordering::Relaxed);

        let key = PendingKey::new(&operation, task_key);
        let (sender, handle) = AckHandle::pair();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(waiters) = pending.get_mut(&key) {
                warn!(
                    task_key = %key.task_key,
                    doc_id = %key.doc_id,
                    version = key.version,
                    "Duplicate write; sharing pending outcome"
                );
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                waiters.push(sender);
                return handle;
            }
            if pending.len() >= self.max_pending {
                drop(pending);
                return self.reject(&key.task_key, "too many pending operations");
            }
            pending.insert(key.clone(), vec![sender]);
        }

        if let Err(mpsc::error::SendError(Command::Add(_, key))) =
            self.tx.send(Command::Add(operation, key))
        {
            // Collector already gone: fail the waiters registered above.
            let waiters = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key)
                .unwrap_or_default();
            self.counters
                .failed
                .fetch_add(waiters.len() as u64, Ordering::Relaxed);
            for waiter in waiters {
                waiter.resolve(false);
            }
        }
        handle
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

struct Collector {
    config: ProcessorConfig,
    shared: Arc<Shared>,
    batch: Vec<(BulkOperation, PendingKey)>,
    batch_bytes: usize,
    workers: JoinSet<()>,
    permits: Arc<Semaphore>,
}

impl Collector {
    fn new(config: ProcessorConfig, shared: Arc<Shared>) -> Self {
        let permits = Arc::new(Semaphore::new(config.num_workers.max(1)));
        Self {
            config,
            shared,
            batch: Vec::new(),
            batch_bytes: 0,
            workers: JoinSet::new(),
            permits,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.flush_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Add(op, key)) => self.push(op, key).await,
                    Some(Command::Flush(done)) => {
                        self.dispatch().await;
                        self.drain_workers().await;
                        let _ = done.send(());
                    }
                    Some(Command::Stop(done)) => {
                        rx.close();
                        let mut flush_waiters = Vec::new();
                        while let Ok(cmd) = rx.try_recv() {
                            match cmd {
                                Command::Add(op, key) => self.push(op, key).await,
                                Command::Flush(w) | Command::Stop(w) => flush_waiters.push(w),
                            }
                        }
                        self.shutdown().await;
                        let _ = done.send(());
                        for waiter in flush_waiters {
                            let _ = waiter.send(());
                        }
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        debug!(batch_len = self.batch.len(), "Flush interval elapsed");
                        self.dispatch().await;
                    }
                }
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "Bulk worker ended abnormally; its batch was failed");
                    }
                }
            }
        }
    }

    async fn push(&mut self, op: BulkOperation, key: PendingKey) {
        self.batch_bytes += op.estimated_size();
        self.batch.push((op, key));
        if self.batch.len() >= self.config.bulk_actions
            || self.batch_bytes >= self.config.bulk_size_bytes
        {
            self.dispatch().await;
        }
    }

    /// Hand the current batch to a worker, waiting for a free slot.
    async fn dispatch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        self.batch_bytes = 0;

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            for (_, key) in &batch {
                self.shared.resolve(key, false);
            }
            return;
        };
        self.shared.counters.batches.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        self.workers.spawn(async move {
            commit_batch(&shared, batch).await;
            drop(permit);
        });
    }

    async fn drain_workers(&mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Bulk worker ended abnormally; its batch was failed");
            }
        }
    }

    async fn shutdown(&mut self) {
        self.dispatch().await;
        self.drain_workers().await;
        self.shared.fail_all_pending();
    }
}

/// Writes of a batch that have no outcome yet.
///
/// Dropping it fails whatever is left, so a worker that unwinds (a panicking
/// client, an aborted task) never leaves handles waiting.
struct Unresolved<'a> {
    shared: &'a Shared,
    keys: Vec<PendingKey>,
}

impl Unresolved<'_> {
    fn fail(&mut self) {
        for key in std::mem::take(&mut self.keys) {
            self.shared.resolve(&key, false);
        }
    }
}

impl Drop for Unresolved<'_> {
    fn drop(&mut self) {
        if !self.keys.is_empty() {
            warn!(remaining = self.keys.len(), "Bulk worker exited with unresolved operations");
            self.fail();
        }
    }
}

/// Commit one batch, resubmitting transient failures until the policy gives up.
async fn commit_batch(shared: &Shared, batch: Vec<(BulkOperation, PendingKey)>) {
    let (mut ops, keys): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
    let mut unresolved = Unresolved { shared, keys };
    let mut attempt = 0u32;

    while !ops.is_empty() {
        attempt += 1;
        let response = shared.client.bulk(&ops).await;
        let mut retry_ops = Vec::new();
        let mut retry_keys = Vec::new();

        match response {
            Ok(results) if results.len() == ops.len() => {
                let keys = std::mem::take(&mut unresolved.keys);
                for ((op, key), result) in ops.into_iter().zip(keys).zip(results) {
                    match classify(op.request_type, &result) {
                        ItemOutcome::Committed => {
                            debug!(
                                doc_id = %op.id,
                                task_key = %key.task_key,
                                version = op.version,
                                status = result.status,
                                "Operation committed"
                            );
                            shared.resolve(&key, true);
                        }
                        ItemOutcome::Retry => {
                            retry_ops.push(op);
                            retry_keys.push(key);
                        }
                        ItemOutcome::Failed => {
                            warn!(
                                doc_id = %op.id,
                                task_key = %key.task_key,
                                status = result.status,
                                error = result.error.as_deref().unwrap_or(""),
                                "Operation rejected by backend"
                            );
                            shared.resolve(&key, false);
                        }
                    }
                }
            }
            Ok(results) => {
                warn!(
                    sent = ops.len(),
                    received = results.len(),
                    "Bulk response item count mismatch"
                );
                unresolved.fail();
                return;
            }
            Err(err) if err.is_transient() => {
                warn!(
                    error = %err,
                    attempt,
                    batch_len = ops.len(),
                    "Bulk request failed transiently"
                );
                retry_ops = ops;
                retry_keys = std::mem::take(&mut unresolved.keys);
            }
            Err(err) => {
                warn!(error = %err, batch_len = ops.len(), "Bulk request failed");
                unresolved.fail();
                return;
            }
        }

        unresolved.keys = retry_keys;
        if retry_ops.is_empty() {
            return;
        }
        if !shared.policy.allows_retry(attempt) {
            warn!(attempt, remaining = retry_ops.len(), "Retries exhausted");
            unresolved.fail();
            return;
        }

        let delay = shared.policy.delay_for_attempt(attempt - 1);
        debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            remaining = retry_ops.len(),
            "Retrying bulk items"
        );
        shared
            .counters
            .retried
            .fetch_add(retry_ops.len() as u64, Ordering::Relaxed);
        tokio::time::sleep(delay).await;
        ops = retry_ops;
    }
}
