// src/lib.rs
// Public library surface for the binary, the demo and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod country;
pub mod fetcher;
pub mod llm;
pub mod metrics;
pub mod record;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::cache::{CacheError, PutOutcome, SentimentCache};
pub use crate::country::{normalize_country_name, CountryKey};
pub use crate::fetcher::{BatchFetcher, FetchError, RetryPolicy, SentimentSource};
pub use crate::record::{SentimentLabel, SentimentRecord};
pub use crate::scheduler::{
    KeyOutcome, Scheduler, SchedulerConfig, SchedulerSnapshot, SchedulerStatus, StepOutcome,
};
