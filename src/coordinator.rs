//! # Selection Coordinator
//! What happens when a user clicks a country: serve the cached record if it is
//! fresh, otherwise prioritize a refresh and wait (bounded) for it.
//!
//! Waiting uses the scheduler's per-key completion signal. If that signal is
//! dropped without an answer the coordinator falls back to polling the cache
//! until the deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::{CacheError, SentimentCache};
use crate::country::CountryKey;
use crate::record::SentimentRecord;
use crate::scheduler::{KeyOutcome, Scheduler};

pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "lowercase")]
pub enum Selection {
    /// Cached record was within the freshness window.
    Fresh(SentimentRecord),
    /// A refresh completed while we waited.
    Refreshed(SentimentRecord),
    /// Refresh did not arrive in time (or failed); this is the old record.
    Stale(SentimentRecord),
    /// Nothing cached and nothing arrived.
    Unavailable,
}

impl Selection {
    pub fn record(&self) -> Option<&SentimentRecord> {
        match self {
            Selection::Fresh(r) | Selection::Refreshed(r) | Selection::Stale(r) => Some(r),
            Selection::Unavailable => None,
        }
    }
}

pub struct SelectionCoordinator {
    scheduler: Arc<Scheduler>,
    cache: Arc<SentimentCache>,
    timeout: Duration,
    poll_interval: Duration,
}

impl SelectionCoordinator {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let cache = scheduler.cache().clone();
        Self {
            scheduler,
            cache,
            timeout: DEFAULT_SELECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Serve `key`, refreshing it first when stale. With `wait == false` a stale
    /// record is returned right after the refresh is requested.
    pub async fn select(&self, key: CountryKey, wait: bool) -> Result<Selection, CacheError> {
        let before = self.cache.get(&key).await?;
        if let Some(rec) = &before {
            if !self.cache.is_stale(rec, Utc::now()) {
                return Ok(Selection::Fresh(rec.clone()));
            }
        }

        let signal = self.scheduler.prioritize_and_watch(key.clone());
        if !wait {
            return Ok(fallback(before));
        }

        let deadline = Instant::now() + self.timeout;
        let since = before.as_ref().map(|r| r.last_updated);

        match tokio::time::timeout_at(deadline, signal).await {
            Ok(Ok(KeyOutcome::Updated(rec))) => {
                info!(target: "coordinator", country = %key, "selection refreshed");
                return Ok(Selection::Refreshed(rec));
            }
            Ok(Ok(KeyOutcome::Skipped)) | Ok(Ok(KeyOutcome::Halted(_))) => {
                debug!(target: "coordinator", country = %key, "refresh did not produce a record");
                return Ok(fallback(self.cache.get(&key).await?.or(before)));
            }
            Err(_elapsed) => {
                debug!(target: "coordinator", country = %key, "timed out waiting for refresh");
                return Ok(fallback(before));
            }
            // Sender dropped without an answer: poll instead.
            Ok(Err(_closed)) => {}
        }

        loop {
            if let Some(rec) = self.cache.get(&key).await? {
                if since.map_or(true, |t| rec.last_updated > t) {
                    return Ok(Selection::Refreshed(rec));
                }
            }
            if Instant::now() + self.poll_interval > deadline {
                return Ok(fallback(before));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn fallback(record: Option<SentimentRecord>) -> Selection {
    match record {
        Some(rec) => Selection::Stale(rec),
        None => Selection::Unavailable,
    }
}
