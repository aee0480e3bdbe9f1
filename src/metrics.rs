use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the static batch-size gauge.
    pub fn init(batch_size: usize) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        describe_all();
        gauge!("ingest_batch_size").set(batch_size as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_batches_total", "Batches dispatched to the text generation service.");
        describe_counter!(
            "ingest_batch_skipped_total",
            "Batches that produced no usable records."
        );
        describe_counter!(
            "ingest_quota_exhausted_total",
            "Runs halted because the API quota was exhausted."
        );
        describe_counter!(
            "ingest_records_written_total",
            "Country records written to the cache."
        );
        describe_counter!(
            "ingest_stale_writes_rejected_total",
            "Writes rejected because a newer record was cached."
        );
        describe_counter!("fetch_retries_total", "Batch fetch retries after backoff.");
        describe_counter!(
            "cache_store_degraded_total",
            "Store operations that fell back to the in-memory mirror."
        );
        describe_gauge!("ingest_queue_remaining", "Countries waiting in the work queue.");
        describe_gauge!("ingest_batch_size", "Configured countries per batch.");
        describe_histogram!("ingest_fetch_ms", "Batch fetch time in milliseconds, retries included.");
    });
}
