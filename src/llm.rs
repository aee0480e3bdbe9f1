//! Text-generation boundary: provider abstraction, error classification, and
//! the concrete clients (Gemini over HTTP, deterministic mock, disabled).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmConfig;

/// Prompt plus the strict JSON schema the response must follow.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub response_schema: Value,
    /// Ask the provider to ground the answer with live search results.
    pub grounded: bool,
    /// Countries the prompt asks about (diagnostics and the mock provider).
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// 429 / quota / RESOURCE_EXHAUSTED.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network trouble, timeouts, 5xx. Worth another try.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Anything retrying will not fix (bad request, auth, disabled client).
    #[error("generation failed: {0}")]
    Fatal(String),
}

impl GenerationError {
    /// Classify a provider failure from its HTTP status (if any) and message text.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let rate_limited = status == Some(429)
            || lower.contains("quota")
            || lower.contains("resource_exhausted")
            || lower.contains("rate limit");
        if rate_limited {
            return Self::RateLimited(message.to_string());
        }
        match status {
            Some(408) | Some(500..=599) | None => Self::Transient(message.to_string()),
            Some(_) => Self::Fatal(message.to_string()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Raw text of the model answer (expected to be JSON per the schema).
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynGenerator = Arc<dyn TextGenerator>;

/// Factory: build a generator according to config and environment variables.
///
/// * If `LLM_TEST_MODE=mock`, returns the deterministic mock.
/// * Else if `config.enabled == false`, returns a disabled generator.
/// * Else builds the configured provider.
pub fn build_generator(config: &LlmConfig) -> Result<DynGenerator> {
    if std::env::var("LLM_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockGenerator));
    }
    if !config.enabled {
        return Ok(Arc::new(DisabledGenerator));
    }
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockGenerator)),
        "gemini" if config.api_key.is_empty() => {
            tracing::warn!("GEMINI_API_KEY missing; text generation disabled");
            Ok(Arc::new(DisabledGenerator))
        }
        "gemini" => Ok(Arc::new(GeminiClient::new(
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        other => anyhow::bail!("unsupported text generation provider: {other}"),
    }
}

// ------------------------------------------------------------
// Gemini
// ------------------------------------------------------------

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("country-sentiment/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point the client at another endpoint (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
            },
        });
        if request.grounded {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}
#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}
#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}
#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| GenerationError::classify(e.status().map(|s| s.as_u16()), &e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::classify(
                Some(status.as_u16()),
                &format!("HTTP {status}: {body}"),
            ));
        }

        let body: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Transient(format!("reading response body: {e}")))?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

// ------------------------------------------------------------
// Mock + disabled
// ------------------------------------------------------------

/// Deterministic offline generator: one neutral-ish record per subject.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockGenerator;

impl MockGenerator {
    fn score_for(name: &str) -> f64 {
        // Stable pseudo-score in [-0.5, 0.5] so the map has some colour.
        let sum: u32 = name.bytes().map(u32::from).sum();
        f64::from(sum % 101) / 100.0 - 0.5
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let records: Vec<Value> = request
            .subjects
            .iter()
            .map(|name| {
                json!({
                    "countryName": name,
                    "sentimentScore": Self::score_for(name),
                    "summary": format!("Mock sentiment for {name}."),
                    "headlines": [{
                        "title": format!("{name} in the news (mock)"),
                        "category": "NEUTRAL",
                        "snippet": "Generated offline.",
                    }],
                })
            })
            .collect();
        Ok(Value::Array(records).to_string())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Always fails without calling anything; used when generation is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal("text generation disabled".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}
