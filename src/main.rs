//! Country sentiment service: binary entrypoint.
//! Loads config, wires store + fetcher + scheduler, starts the ingestion worker
//! and serves the HTTP API until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use country_sentiment::config::AppConfig;
use country_sentiment::country::all_country_keys;
use country_sentiment::fetcher::{BatchFetcher, RetryPolicy};
use country_sentiment::llm::build_generator;
use country_sentiment::metrics::Metrics;
use country_sentiment::store::FileStore;
use country_sentiment::{router, AppState};

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("country_sentiment=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading configuration")?;
    info!(
        provider = %cfg.llm.provider,
        enabled = cfg.llm.enabled,
        key_len = cfg.llm.api_key.len(),
        batch_size = cfg.batch_size,
        store_dir = %cfg.store_dir.display(),
        "config loaded"
    );

    let metrics = Metrics::init(cfg.batch_size)?;

    let generator = build_generator(&cfg.llm)?;
    let fetcher = BatchFetcher::new(generator)
        .with_retry(RetryPolicy::new(cfg.max_retries, cfg.initial_backoff()));
    let store = Arc::new(FileStore::new(cfg.store_dir.clone()));
    let state = AppState::build(&cfg, store, Arc::new(fetcher));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = state.scheduler.clone().spawn_worker(shutdown_rx);

    if cfg.sweep_on_start {
        match state.scheduler.start(all_country_keys(), false).await {
            Ok(added) => info!(added, "initial sweep queued"),
            Err(e) => warn!(error = %e, "initial sweep not started"),
        }
    }

    let app = router(state).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    let _ = shutdown_tx.send(());
    let _ = worker.await;
    Ok(())
}
