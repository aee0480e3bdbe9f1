// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const ENV_CONFIG_PATH: &str = "SENTIMENT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/sentiment.toml";
pub const ENV_API_KEY: &str = "GEMINI_API_KEY";

fn default_batch_size() -> usize {
    3
}
fn default_freshness_window_hours() -> i64 {
    22
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_secs() -> u64 {
    15
}
fn default_select_timeout_secs() -> u64 {
    45
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_quota_cooldown_hours() -> i64 {
    24
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("data/store")
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    90
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "gemini" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Countries per external call. Sanitized into 1..=10.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// How long a selection waits for a prioritized refresh.
    #[serde(default = "default_select_timeout_secs")]
    pub select_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Informational resume time reported after quota exhaustion.
    #[serde(default = "default_quota_cooldown_hours")]
    pub quota_cooldown_hours: i64,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Seed a full sweep of stale countries at startup.
    #[serde(default)]
    pub sweep_on_start: bool,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            freshness_window_hours: default_freshness_window_hours(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            select_timeout_secs: default_select_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            quota_cooldown_hours: default_quota_cooldown_hours(),
            store_dir: default_store_dir(),
            bind_addr: default_bind_addr(),
            sweep_on_start: false,
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML file, then sanitize and resolve the API key.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        cfg.finish()
    }

    /// Load config using env var + fallbacks:
    /// 1) $SENTIMENT_CONFIG_PATH
    /// 2) config/sentiment.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from_file(&default_path);
        }
        AppConfig::default().finish()
    }

    fn finish(mut self) -> Result<Self> {
        self.sanitize();
        self.llm.provider = self.llm.provider.trim().to_lowercase();

        if self.llm.enabled && self.llm.api_key.trim().eq_ignore_ascii_case("env") {
            self.llm.api_key = match self.llm.provider.as_str() {
                // A missing key is not fatal: the client reports itself disabled.
                "gemini" => env::var(ENV_API_KEY).unwrap_or_default(),
                "mock" => String::new(),
                other => bail!("Unsupported provider in config: {other}"),
            };
        }
        Ok(self)
    }

    fn sanitize(&mut self) {
        self.batch_size = self.batch_size.clamp(1, 10);
        if self.freshness_window_hours <= 0 {
            self.freshness_window_hours = default_freshness_window_hours();
        }
        if self.select_timeout_secs == 0 {
            self.select_timeout_secs = default_select_timeout_secs();
        }
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = default_poll_interval_ms();
        }
        if self.quota_cooldown_hours < 0 {
            self.quota_cooldown_hours = default_quota_cooldown_hours();
        }
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.freshness_window_hours)
    }

    pub fn quota_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.quota_cooldown_hours)
    }

    pub fn select_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.select_timeout_secs)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.initial_backoff_secs)
    }
}
