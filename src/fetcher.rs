//! # Batch Fetcher
//! One external call per batch of countries, with bounded exponential backoff.
//!
//! Only quota exhaustion escapes as an error. Malformed answers, fatal provider
//! errors, and transient failures that outlive the retry budget all degrade to
//! an empty result, which the scheduler treats as a skipped batch.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::country::CountryKey;
use crate::llm::{DynGenerator, GenerationError, GenerationRequest};
use crate::record::{SentimentRecord, WireCountryRecord};

pub const MAX_RETRIES: u32 = 2;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Delay before retry number `retry` (0-based): initial, 2x, 4x, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The external call allowance is used up; retrying now is pointless.
    #[error("API quota exhausted: {0}")]
    QuotaExhausted(String),
}

/// What the scheduler pulls batches from. Results may be shorter than the
/// input and in any order; callers re-key by `country_name`.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch_batch(&self, keys: &[CountryKey]) -> Result<Vec<SentimentRecord>, FetchError>;
}

pub struct BatchFetcher {
    generator: DynGenerator,
    retry: RetryPolicy,
    grounded: bool,
}

impl BatchFetcher {
    pub fn new(generator: DynGenerator) -> Self {
        Self {
            generator,
            retry: RetryPolicy::default(),
            grounded: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_grounding(mut self, grounded: bool) -> Self {
        self.grounded = grounded;
        self
    }

    fn request_for(&self, keys: &[CountryKey]) -> GenerationRequest {
        GenerationRequest {
            prompt: build_prompt(keys),
            response_schema: response_schema(),
            grounded: self.grounded,
            subjects: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl SentimentSource for BatchFetcher {
    async fn fetch_batch(&self, keys: &[CountryKey]) -> Result<Vec<SentimentRecord>, FetchError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.request_for(keys);
        let provider = self.generator.provider_name();
        let t0 = Instant::now();
        let mut retry = 0u32;

        let outcome = loop {
            match self.generator.generate(&request).await {
                Ok(text) => break Ok(text),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry);
                    retry += 1;
                    counter!("fetch_retries_total").increment(1);
                    warn!(
                        target: "fetcher",
                        provider,
                        batch = ?keys,
                        error = %e,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "batch fetch failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(text) => {
                let records = parse_batch(&text, Utc::now());
                info!(
                    target: "fetcher",
                    provider,
                    requested = keys.len(),
                    returned = records.len(),
                    "batch fetched"
                );
                Ok(records)
            }
            Err(GenerationError::RateLimited(msg)) => {
                warn!(target: "fetcher", provider, batch = ?keys, retries = retry, "rate limit persisted; quota exhausted");
                Err(FetchError::QuotaExhausted(msg))
            }
            Err(e) => {
                warn!(target: "fetcher", provider, batch = ?keys, error = %e, "batch fetch gave up");
                Ok(Vec::new())
            }
        }
    }
}

/// Parse the model answer. Anything that is not a JSON array yields an empty list;
/// individual unusable elements are dropped.
pub fn parse_batch(text: &str, fetched_at: DateTime<Utc>) -> Vec<SentimentRecord> {
    let body = strip_code_fence(text);
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "fetcher", error = %e, "malformed batch response");
            return Vec::new();
        }
    };
    let Value::Array(items) = value else {
        warn!(target: "fetcher", "batch response is not an array");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WireCountryRecord>(item) {
            Ok(wire) => wire.into_record(fetched_at),
            Err(e) => {
                debug!(target: "fetcher", error = %e, "dropping malformed record");
                None
            }
        })
        .collect()
}

/// Models like to wrap JSON in ```json fences even when told not to.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn build_prompt(keys: &[CountryKey]) -> String {
    let list = keys
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Search for the most important news from the last 24 hours for each of these countries: {list}.\n\
         For every country return one object with:\n\
         - countryName: exactly as given above\n\
         - sentimentScore: a number from -1.0 (very negative) to 1.0 (very positive) for the overall news mood\n\
         - summary: two or three neutral sentences explaining the score\n\
         - headlines: up to 5 recent headlines, each with title, category (GOOD, BAD or NEUTRAL), \
         a one-sentence snippet, and the source name and url when known.\n\
         Return only the JSON array."
    )
}

/// Strict output schema: array of per-country records.
pub fn response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "countryName": { "type": "STRING" },
                "sentimentScore": { "type": "NUMBER" },
                "summary": { "type": "STRING" },
                "headlines": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "title": { "type": "STRING" },
                            "category": { "type": "STRING", "enum": ["GOOD", "BAD", "NEUTRAL"] },
                            "snippet": { "type": "STRING" },
                            "source": { "type": "STRING" },
                            "url": { "type": "STRING" }
                        },
                        "required": ["title", "category", "snippet"]
                    }
                }
            },
            "required": ["countryName", "sentimentScore", "summary", "headlines"]
        }
    })
}
