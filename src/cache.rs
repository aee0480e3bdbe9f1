//! # Freshness Cache
//! Latest sentiment per country plus a per-day archive, backed by a
//! [`DocumentStore`] with an in-process mirror.
//!
//! The mirror is always updated before the store so reads in the same process
//! observe a write even while the store is down. Timestamps per country never
//! move backwards: an older record is rejected instead of overwriting a newer one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::country::CountryKey;
use crate::record::SentimentRecord;
use crate::store::{DocumentStore, StoreError};

/// Collection holding one overwritten document per country.
pub const LATEST_COLLECTION: &str = "country_sentiment";
/// Collection holding one document per (country, UTC day).
pub const ARCHIVE_COLLECTION: &str = "sentiment_history";

pub const DEFAULT_FRESHNESS_HOURS: i64 = 22;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("sentiment store denied access, fix the store access rules: {0}")]
    PermissionDenied(String),
}

/// What a `put` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Mirror and store both hold the record.
    Written,
    /// Store unreachable; only the mirror holds the record.
    MirroredOnly,
    /// A newer record is already cached; nothing changed.
    RejectedStale { cached: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub record: SentimentRecord,
}

/// `true` once `now - last_updated` exceeds `window`.
pub fn is_stale_at(record: &SentimentRecord, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(record.last_updated) > window
}

pub struct SentimentCache {
    store: Arc<dyn DocumentStore>,
    mirror: RwLock<HashMap<CountryKey, SentimentRecord>>,
    freshness_window: Duration,
}

impl SentimentCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_window(store, Duration::hours(DEFAULT_FRESHNESS_HOURS))
    }

    pub fn with_window(store: Arc<dyn DocumentStore>, freshness_window: Duration) -> Self {
        Self {
            store,
            mirror: RwLock::new(HashMap::new()),
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn is_stale(&self, record: &SentimentRecord, now: DateTime<Utc>) -> bool {
        is_stale_at(record, now, self.freshness_window)
    }

    /// Latest record for `key`, preferring whichever of store and mirror is newer.
    pub async fn get(&self, key: &CountryKey) -> Result<Option<SentimentRecord>, CacheError> {
        match self.store.get(LATEST_COLLECTION, key.as_str()).await {
            Ok(Some(doc)) => match parse_record(doc) {
                Some(rec) => Ok(Some(self.mirror_if_newer(rec))),
                None => {
                    warn!(target: "cache", country = %key, "unreadable cached document; using mirror");
                    Ok(self.mirror_get(key))
                }
            },
            Ok(None) => Ok(self.mirror_get(key)),
            Err(e) => {
                self.degrade(e, "get")?;
                Ok(self.mirror_get(key))
            }
        }
    }

    /// Write `record` as the latest value and into today's archive slot.
    pub async fn put(&self, record: SentimentRecord) -> Result<PutOutcome, CacheError> {
        // Pull in anything newer the store already has before comparing.
        self.get(&record.country_name).await?;

        {
            let mut mirror = self.mirror_write();
            if let Some(cached) = mirror.get(&record.country_name) {
                if cached.last_updated > record.last_updated {
                    counter!("ingest_stale_writes_rejected_total").increment(1);
                    debug!(
                        target: "cache",
                        country = %record.country_name,
                        cached = %cached.last_updated,
                        incoming = %record.last_updated,
                        "rejecting out-of-order write"
                    );
                    return Ok(PutOutcome::RejectedStale {
                        cached: cached.last_updated,
                    });
                }
            }
            mirror.insert(record.country_name.clone(), record.clone());
        }

        let doc = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "cache", error = %e, "could not serialize record; kept in mirror only");
                return Ok(PutOutcome::MirroredOnly);
            }
        };
        let key = record.country_name.as_str();

        if let Err(e) = self.store.put(LATEST_COLLECTION, key, doc.clone()).await {
            self.degrade(e, "put latest")?;
            return Ok(PutOutcome::MirroredOnly);
        }

        let day = record.last_updated.date_naive();
        let archive_id = format!("{key}_{day}");
        if let Err(e) = self
            .store
            .put(ARCHIVE_COLLECTION, &archive_id, archive_doc(doc, day))
            .await
        {
            self.degrade(e, "put archive")?;
            return Ok(PutOutcome::MirroredOnly);
        }

        Ok(PutOutcome::Written)
    }

    /// Every known record, store and mirror merged, sorted by country.
    pub async fn list_all(&self) -> Result<Vec<SentimentRecord>, CacheError> {
        match self.store.list(LATEST_COLLECTION).await {
            Ok(docs) => {
                for rec in docs.into_iter().filter_map(parse_record) {
                    self.mirror_if_newer(rec);
                }
            }
            Err(e) => self.degrade(e, "list")?,
        }

        let mut out: Vec<SentimentRecord> = self.mirror_read().values().cloned().collect();
        out.sort_by(|a, b| a.country_name.cmp(&b.country_name));
        Ok(out)
    }

    /// Archived daily records for `key`, oldest first. Empty while the store is down.
    pub async fn history(&self, key: &CountryKey) -> Result<Vec<HistoryPoint>, CacheError> {
        let docs = match self
            .store
            .query_eq(ARCHIVE_COLLECTION, "countryName", key.as_str())
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                self.degrade(e, "history")?;
                return Ok(Vec::new());
            }
        };

        let mut points: Vec<HistoryPoint> = docs
            .into_iter()
            .filter_map(|doc| {
                let date = doc
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(|d| d.parse::<NaiveDate>().ok())?;
                let record = parse_record(doc)?;
                Some(HistoryPoint { date, record })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    /// Mirror-only lookup; never touches the store.
    pub fn peek(&self, key: &CountryKey) -> Option<SentimentRecord> {
        self.mirror_get(key)
    }

    fn degrade(&self, e: StoreError, op: &'static str) -> Result<(), CacheError> {
        match e {
            StoreError::PermissionDenied(msg) => {
                tracing::error!(target: "cache", store = self.store.name(), op, %msg, "store permission denied");
                Err(CacheError::PermissionDenied(msg))
            }
            other => {
                counter!("cache_store_degraded_total").increment(1);
                warn!(target: "cache", store = self.store.name(), op, error = %other, "store degraded; using in-memory mirror");
                Ok(())
            }
        }
    }

    fn mirror_get(&self, key: &CountryKey) -> Option<SentimentRecord> {
        self.mirror_read().get(key).cloned()
    }

    /// Insert `rec` unless the mirror already holds something newer; returns the winner.
    fn mirror_if_newer(&self, rec: SentimentRecord) -> SentimentRecord {
        let mut mirror = self.mirror_write();
        match mirror.get(&rec.country_name) {
            Some(existing) if existing.last_updated > rec.last_updated => existing.clone(),
            _ => {
                mirror.insert(rec.country_name.clone(), rec.clone());
                rec
            }
        }
    }

    fn mirror_read(&self) -> RwLockReadGuard<'_, HashMap<CountryKey, SentimentRecord>> {
        match self.mirror.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn mirror_write(&self) -> RwLockWriteGuard<'_, HashMap<CountryKey, SentimentRecord>> {
        match self.mirror.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

fn parse_record(doc: Value) -> Option<SentimentRecord> {
    serde_json::from_value(doc).ok()
}

fn archive_doc(mut doc: Value, day: NaiveDate) -> Value {
    if let Value::Object(map) = &mut doc {
        map.insert("date".to_string(), Value::String(day.to_string()));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rec(name: &str, score: f64, at: DateTime<Utc>) -> SentimentRecord {
        SentimentRecord::new(name.into(), score, "summary", vec![], at)
    }

    #[test]
    fn staleness_uses_strict_window() {
        let now = Utc::now();
        let window = Duration::hours(22);
        assert!(!is_stale_at(&rec("Peru", 0.0, now - Duration::hours(22)), now, window));
        assert!(is_stale_at(
            &rec("Peru", 0.0, now - Duration::hours(22) - Duration::seconds(1)),
            now,
            window
        ));
    }

    #[tokio::test]
    async fn put_writes_latest_and_archive() {
        let store = Arc::new(MemoryStore::new());
        let cache = SentimentCache::new(store.clone());
        let now = Utc::now();

        let out = cache.put(rec("Chile", 0.2, now)).await.unwrap();
        assert_eq!(out, PutOutcome::Written);
        assert_eq!(store.write_count(), 2);

        let history = cache.history(&"Chile".into()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].date, now.date_naive());
    }

    #[tokio::test]
    async fn mirror_serves_reads_while_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        let cache = SentimentCache::new(store.clone());
        store.fail_with(StoreError::Unavailable("offline".into()));

        let out = cache.put(rec("Chile", 0.2, Utc::now())).await.unwrap();
        assert_eq!(out, PutOutcome::MirroredOnly);
        let got = cache.get(&"Chile".into()).await.unwrap().unwrap();
        assert_eq!(got.sentiment_score, 0.2);
        assert_eq!(cache.list_all().await.unwrap().len(), 1);
        assert!(cache.history(&"Chile".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_is_surfaced() {
        let store = Arc::new(MemoryStore::new());
        let cache = SentimentCache::new(store.clone());
        store.fail_with(StoreError::PermissionDenied("rules".into()));

        assert!(matches!(
            cache.get(&"Chile".into()).await,
            Err(CacheError::PermissionDenied(_))
        ));
        assert!(matches!(
            cache.put(rec("Chile", 0.1, Utc::now())).await,
            Err(CacheError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn newer_store_record_wins_over_older_mirror() {
        let store = Arc::new(MemoryStore::new());
        let cache = SentimentCache::new(store.clone());
        let now = Utc::now();
        cache.put(rec("Chile", 0.1, now - Duration::hours(5))).await.unwrap();

        let newer = rec("Chile", 0.9, now);
        store
            .put(LATEST_COLLECTION, "Chile", serde_json::to_value(&newer).unwrap())
            .await
            .unwrap();

        let got = cache.get(&"Chile".into()).await.unwrap().unwrap();
        assert_eq!(got.sentiment_score, 0.9);
        assert_eq!(cache.peek(&"Chile".into()).unwrap().sentiment_score, 0.9);
    }
}
