//! # Ingestion Scheduler
//! Owns the work queue of countries waiting for a refresh and drains it one
//! batch at a time through a [`SentimentSource`], writing results into the
//! [`SentimentCache`].
//!
//! State machine: `IDLE -> RUNNING -> (RUNNING | COMPLETE | ERROR) -> IDLE`.
//! `COMPLETE` and `ERROR` are only ever seen in emitted snapshots; the stored
//! status drops back to `IDLE` right after they are reported.
//!
//! Exactly one batch is in flight at a time. `start` and `prioritize` only touch
//! the pending queue, so a key prioritized while a batch is in flight lands in
//! the next batch, never the current one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, PutOutcome, SentimentCache};
use crate::config::AppConfig;
use crate::country::CountryKey;
use crate::fetcher::{FetchError, SentimentSource};
use crate::record::SentimentRecord;

pub const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulerStatus {
    Idle,
    Running,
    Complete,
    Error,
}

/// Read-only view handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub status: SchedulerStatus,
    pub current: Option<CountryKey>,
    pub remaining: usize,
    pub error_message: Option<String>,
    /// Earliest time the quota is expected back after an `ERROR`.
    pub quota_reset_at: Option<DateTime<Utc>>,
}

/// How a single key's refresh settled, delivered through [`Scheduler::watch_key`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    Updated(SentimentRecord),
    /// The batch ran but produced nothing usable for this key.
    Skipped,
    /// The run stopped before this key was refreshed.
    Halted(String),
}

/// Result of one [`Scheduler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing queued; no external call was made.
    Idle,
    /// A batch settled and more keys are waiting.
    Progressed,
    /// A batch settled and the queue is drained.
    Completed,
    /// The run was halted (quota exhausted or store access denied).
    Halted,
}

pub type Observer = Arc<dyn Fn(&SchedulerSnapshot) + Send + Sync>;

// ------------------------------------------------------------
// Work queue
// ------------------------------------------------------------

/// Ordered, duplicate-free queue of countries.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    keys: VecDeque<CountryKey>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless already queued. Returns whether the key was added.
    pub fn push_back(&mut self, key: CountryKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.push_back(key);
        true
    }

    /// Append every key not already queued, preserving order. Returns how many were added.
    pub fn extend<I: IntoIterator<Item = CountryKey>>(&mut self, keys: I) -> usize {
        keys.into_iter().filter(|k| self.push_back(k.clone())).count()
    }

    /// Move `key` to the front, inserting it if absent.
    pub fn prioritize(&mut self, key: CountryKey) {
        if let Some(pos) = self.keys.iter().position(|k| *k == key) {
            self.keys.remove(pos);
        }
        self.keys.push_front(key);
    }

    /// Pop up to `n` keys from the front.
    pub fn take_batch(&mut self, n: usize) -> Vec<CountryKey> {
        let n = n.min(self.keys.len());
        self.keys.drain(..n).collect()
    }

    pub fn contains(&self, key: &CountryKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn drain_all(&mut self) -> Vec<CountryKey> {
        self.keys.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CountryKey> {
        self.keys.iter()
    }
}

// ------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub quota_cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            quota_cooldown: Duration::hours(24),
        }
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            quota_cooldown: cfg.quota_cooldown(),
        }
    }
}

struct Inner {
    queue: WorkQueue,
    status: SchedulerStatus,
    in_flight: Vec<CountryKey>,
    error_message: Option<String>,
    quota_reset_at: Option<DateTime<Utc>>,
    observer: Option<Observer>,
    waiters: HashMap<CountryKey, Vec<oneshot::Sender<KeyOutcome>>>,
}

impl Inner {
    fn snapshot(&self, status: SchedulerStatus, current: Option<CountryKey>) -> SchedulerSnapshot {
        SchedulerSnapshot {
            status,
            current,
            remaining: self.queue.len(),
            error_message: self.error_message.clone(),
            quota_reset_at: self.quota_reset_at,
        }
    }

    /// Leave a previous `ERROR` behind when a caller explicitly asks for more work.
    fn resume(&mut self, now: DateTime<Utc>) {
        if let Some(reset) = self.quota_reset_at {
            if now < reset {
                warn!(target: "scheduler", quota_reset_at = %reset, "resuming before expected quota reset");
            }
        }
        self.error_message = None;
        self.status = SchedulerStatus::Running;
    }

    fn take_waiters(&mut self, key: &CountryKey) -> Vec<oneshot::Sender<KeyOutcome>> {
        self.waiters.remove(key).unwrap_or_default()
    }
}

pub struct Scheduler {
    source: Arc<dyn SentimentSource>,
    cache: Arc<SentimentCache>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    /// Serializes `step` so at most one batch is in flight.
    step_gate: tokio::sync::Mutex<()>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn SentimentSource>,
        cache: Arc<SentimentCache>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
            inner: Mutex::new(Inner {
                queue: WorkQueue::new(),
                status: SchedulerStatus::Idle,
                in_flight: Vec::new(),
                error_message: None,
                quota_reset_at: None,
                observer: None,
                waiters: HashMap::new(),
            }),
            step_gate: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub fn cache(&self) -> &Arc<SentimentCache> {
        &self.cache
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Register the single observer, replacing any previous one. Past snapshots are not replayed.
    pub fn set_callback<F>(&self, observer: F)
    where
        F: Fn(&SchedulerSnapshot) + Send + Sync + 'static,
    {
        self.lock().observer = Some(Arc::new(observer));
    }

    pub fn clear_callback(&self) {
        self.lock().observer = None;
    }

    /// Current state (`IDLE` or `RUNNING`), including the last error if any.
    pub fn state(&self) -> SchedulerSnapshot {
        let g = self.lock();
        g.snapshot(g.status, g.in_flight.first().cloned())
    }

    /// Keys waiting for a batch, in dispatch order.
    pub fn queued(&self) -> Vec<CountryKey> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Seed the queue (or merge into it while running).
    ///
    /// Keys are deduplicated with order preserved. Unless `force` is set, keys
    /// whose cached record is still fresh are dropped first. Returns how many
    /// keys were actually added.
    pub async fn start(&self, keys: Vec<CountryKey>, force: bool) -> Result<usize, CacheError> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<CountryKey> = keys
            .into_iter()
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();

        if !force {
            let now = Utc::now();
            let mut stale = Vec::with_capacity(candidates.len());
            for key in candidates {
                match self.cache.get(&key).await? {
                    Some(rec) if !self.cache.is_stale(&rec, now) => {
                        debug!(target: "scheduler", country = %key, "fresh in cache; not queued");
                    }
                    _ => stale.push(key),
                }
            }
            candidates = stale;
        }

        let added = {
            let mut g = self.lock();
            if candidates.is_empty() && g.queue.is_empty() {
                return Ok(0);
            }
            let added = if g.status == SchedulerStatus::Running {
                // Keys in the dispatched batch are already being refreshed.
                let in_flight = std::mem::take(&mut g.in_flight);
                let added = g
                    .queue
                    .extend(candidates.into_iter().filter(|k| !in_flight.contains(k)));
                g.in_flight = in_flight;
                added
            } else {
                g.queue = WorkQueue::new();
                g.queue.extend(candidates)
            };
            if !g.queue.is_empty() && g.status != SchedulerStatus::Running {
                g.resume(Utc::now());
            }
            gauge!("ingest_queue_remaining").set(g.queue.len() as f64);
            info!(target: "scheduler", added, queued = g.queue.len(), force, "sweep started");
            added
        };

        self.wake.notify_one();
        Ok(added)
    }

    /// Put `key` at the front of the queue so the next batch includes it.
    pub fn prioritize(&self, key: CountryKey) {
        {
            let mut g = self.lock();
            Self::prioritize_locked(&mut g, key);
        }
        self.wake.notify_one();
    }

    /// [`prioritize`](Self::prioritize) plus a one-shot signal for that key.
    pub fn prioritize_and_watch(&self, key: CountryKey) -> oneshot::Receiver<KeyOutcome> {
        let rx = {
            let mut g = self.lock();
            let (tx, rx) = oneshot::channel();
            g.waiters.entry(key.clone()).or_default().push(tx);
            Self::prioritize_locked(&mut g, key);
            rx
        };
        self.wake.notify_one();
        rx
    }

    /// One-shot signal resolved the next time `key`'s batch settles or the run halts.
    ///
    /// Only keys that are queued or in flight can be watched. For any other key
    /// the sender is dropped at once and the receiver yields `RecvError`; use
    /// [`prioritize_and_watch`](Self::prioritize_and_watch) to queue and watch together.
    pub fn watch_key(&self, key: CountryKey) -> oneshot::Receiver<KeyOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut g = self.lock();
        if g.queue.contains(&key) || g.in_flight.contains(&key) {
            g.waiters.entry(key).or_default().push(tx);
        } else {
            debug!(target: "scheduler", country = %key, "watch on idle key ignored");
        }
        rx
    }

    fn prioritize_locked(g: &mut Inner, key: CountryKey) {
        debug!(target: "scheduler", country = %key, "prioritized");
        g.queue.prioritize(key);
        if g.status != SchedulerStatus::Running {
            g.resume(Utc::now());
        }
        gauge!("ingest_queue_remaining").set(g.queue.len() as f64);
    }

    /// Fetch and store one batch.
    pub async fn step(&self) -> StepOutcome {
        let _gate = self.step_gate.lock().await;

        let batch = {
            let mut g = self.lock();
            if g.queue.is_empty() {
                g.status = SchedulerStatus::Idle;
                return StepOutcome::Idle;
            }
            g.status = SchedulerStatus::Running;
            let batch = g.queue.take_batch(self.config.batch_size);
            g.in_flight = batch.clone();
            batch
        };

        info!(target: "scheduler", batch = ?batch, "dispatching batch");
        counter!("ingest_batches_total").increment(1);

        let halt_reason = match self.source.fetch_batch(&batch).await {
            Ok(records) => self.store_batch(&batch, records).await,
            Err(FetchError::QuotaExhausted(msg)) => {
                counter!("ingest_quota_exhausted_total").increment(1);
                error!(target: "scheduler", batch = ?batch, %msg, "quota exhausted; halting run");
                Some(format!("API quota exceeded: {msg}"))
            }
        };

        self.settle(batch, halt_reason)
    }

    /// Write every returned record that belongs to `batch`.
    /// Returns a halt reason when the store refuses access.
    async fn store_batch(
        &self,
        batch: &[CountryKey],
        records: Vec<SentimentRecord>,
    ) -> Option<String> {
        if records.is_empty() {
            counter!("ingest_batch_skipped_total").increment(1);
            warn!(target: "scheduler", batch = ?batch, "batch produced no records; skipping");
            self.resolve_keys(batch, |_| KeyOutcome::Skipped);
            return None;
        }

        let mut by_key: HashMap<CountryKey, SentimentRecord> = HashMap::new();
        for rec in records {
            if batch.contains(&rec.country_name) {
                by_key.insert(rec.country_name.clone(), rec);
            } else {
                warn!(target: "scheduler", country = %rec.country_name, "record for unrequested country dropped");
            }
        }

        for key in batch {
            let outcome = match by_key.remove(key) {
                None => KeyOutcome::Skipped,
                Some(rec) => match self.cache.put(rec.clone()).await {
                    Ok(PutOutcome::Written) | Ok(PutOutcome::MirroredOnly) => {
                        counter!("ingest_records_written_total").increment(1);
                        KeyOutcome::Updated(rec)
                    }
                    Ok(PutOutcome::RejectedStale { .. }) => KeyOutcome::Skipped,
                    Err(CacheError::PermissionDenied(msg)) => {
                        return Some(format!("sentiment store permission denied: {msg}"));
                    }
                },
            };
            self.resolve_keys(std::slice::from_ref(key), |_| outcome.clone());
        }
        None
    }

    fn resolve_keys<F>(&self, keys: &[CountryKey], outcome: F)
    where
        F: Fn(&CountryKey) -> KeyOutcome,
    {
        let senders: Vec<_> = {
            let mut g = self.lock();
            keys.iter().map(|k| (k, g.take_waiters(k))).collect()
        };
        for (key, txs) in senders {
            for tx in txs {
                let _ = tx.send(outcome(key));
            }
        }
    }

    /// Update state after a batch and notify the observer outside the lock.
    fn settle(&self, batch: Vec<CountryKey>, halt_reason: Option<String>) -> StepOutcome {
        let mut emitted = Vec::with_capacity(2);
        let mut halted_waiters = Vec::new();

        let (outcome, observer) = {
            let mut g = self.lock();
            g.in_flight.clear();
            let current = batch.first().cloned();

            let outcome = if let Some(reason) = halt_reason {
                let pending = g.queue.drain_all();
                g.error_message = Some(reason.clone());
                g.quota_reset_at = Some(Utc::now() + self.config.quota_cooldown);
                // `remaining` freezes at the keys never attempted.
                emitted.push(SchedulerSnapshot {
                    remaining: pending.len(),
                    ..g.snapshot(SchedulerStatus::Error, current)
                });
                for key in batch.iter().chain(pending.iter()) {
                    for tx in g.take_waiters(key) {
                        halted_waiters.push((tx, reason.clone()));
                    }
                }
                g.status = SchedulerStatus::Idle;
                StepOutcome::Halted
            } else {
                g.quota_reset_at = None;
                emitted.push(g.snapshot(SchedulerStatus::Running, current));
                if g.queue.is_empty() {
                    emitted.push(g.snapshot(SchedulerStatus::Complete, None));
                    g.status = SchedulerStatus::Idle;
                    StepOutcome::Completed
                } else {
                    StepOutcome::Progressed
                }
            };
            gauge!("ingest_queue_remaining").set(g.queue.len() as f64);
            (outcome, g.observer.clone())
        };

        for (tx, reason) in halted_waiters {
            let _ = tx.send(KeyOutcome::Halted(reason));
        }
        match outcome {
            StepOutcome::Completed => info!(target: "scheduler", "sweep complete"),
            StepOutcome::Halted => warn!(target: "scheduler", "sweep halted"),
            _ => {}
        }
        if let Some(observer) = observer {
            for snap in &emitted {
                (*observer)(snap);
            }
        }
        outcome
    }

    /// Step until the queue is drained or the run halts.
    pub async fn run_until_idle(&self) -> StepOutcome {
        let mut last = StepOutcome::Idle;
        loop {
            match self.step().await {
                StepOutcome::Progressed => last = StepOutcome::Progressed,
                StepOutcome::Idle => return last,
                done => return done,
            }
        }
    }

    /// Background driver: drains the queue whenever `start`/`prioritize` add work.
    pub fn spawn_worker(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(target: "scheduler", batch_size = self.config.batch_size, "ingestion worker started");
            'worker: loop {
                tokio::select! {
                    _ = shutdown.recv() => break 'worker,
                    _ = self.wake.notified() => {}
                }
                // One batch per turn so shutdown is seen between (and during) fetches.
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            self.abandon_in_flight();
                            break 'worker;
                        }
                        outcome = self.step() => match outcome {
                            StepOutcome::Progressed => continue,
                            _ => break,
                        },
                    }
                }
            }
            info!(target: "scheduler", "ingestion worker stopping");
        })
    }

    /// Put a batch whose fetch was dropped back at the front of the queue.
    fn abandon_in_flight(&self) {
        let mut g = self.lock();
        let batch = std::mem::take(&mut g.in_flight);
        if batch.is_empty() {
            return;
        }
        warn!(target: "scheduler", batch = ?batch, "in-flight batch abandoned at shutdown");
        for key in batch.into_iter().rev() {
            g.queue.prioritize(key);
        }
        gauge!("ingest_queue_remaining").set(g.queue.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<CountryKey> {
        names.iter().map(|n| CountryKey::new(n)).collect()
    }

    #[test]
    fn queue_deduplicates_and_preserves_order() {
        let mut q = WorkQueue::new();
        assert_eq!(q.extend(keys(&["A", "B", "A", "C"])), 3);
        assert_eq!(q.extend(keys(&["C", "B"])), 0);
        assert_eq!(q.take_batch(10), keys(&["A", "B", "C"]));
    }

    #[test]
    fn prioritize_moves_or_inserts_without_duplicates() {
        let mut q = WorkQueue::new();
        q.extend(keys(&["A", "B", "C", "D", "E"]));
        q.prioritize(CountryKey::new("E"));
        assert_eq!(q.len(), 5);
        assert_eq!(q.take_batch(3), keys(&["E", "A", "B"]));

        q.prioritize(CountryKey::new("Z"));
        assert_eq!(q.take_batch(5), keys(&["Z", "C", "D"]));
        assert!(q.is_empty());
    }

    #[test]
    fn take_batch_is_bounded_by_queue_length() {
        let mut q = WorkQueue::new();
        q.extend(keys(&["A"]));
        assert_eq!(q.take_batch(3).len(), 1);
        assert!(q.take_batch(3).is_empty());
    }
}
