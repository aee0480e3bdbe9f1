use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheError, HistoryPoint, SentimentCache};
use crate::config::AppConfig;
use crate::coordinator::{Selection, SelectionCoordinator};
use crate::country::{all_country_keys, CountryKey};
use crate::fetcher::SentimentSource;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerSnapshot};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub coordinator: Arc<SelectionCoordinator>,
}

impl AppState {
    /// Wire cache, scheduler and coordinator from config.
    pub fn build(
        cfg: &AppConfig,
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn SentimentSource>,
    ) -> Self {
        let cache = Arc::new(SentimentCache::with_window(store, cfg.freshness_window()));
        let scheduler = Arc::new(Scheduler::new(source, cache, SchedulerConfig::from(cfg)));
        let coordinator = Arc::new(
            SelectionCoordinator::new(scheduler.clone())
                .with_timeout(cfg.select_timeout())
                .with_poll_interval(cfg.poll_interval()),
        );
        Self {
            scheduler,
            coordinator,
        }
    }

    fn cache(&self) -> &Arc<SentimentCache> {
        self.scheduler.cache()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/countries", get(list_scores))
        .route("/countries/{name}", get(select_country))
        .route("/countries/{name}/history", get(country_history))
        .route("/ingest/start", post(start_ingest))
        .route("/ingest/prioritize", post(prioritize))
        .route("/ingest/status", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Cache errors mean the store needs operator attention.
pub struct ApiError(CacheError);

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string(), "kind": "store_permission_denied" });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn list_scores(State(state): State<AppState>) -> Result<Json<BTreeMap<String, f64>>, ApiError> {
    let records = state.cache().list_all().await?;
    let scores = records
        .into_iter()
        .map(|r| (r.country_name.to_string(), r.sentiment_score))
        .collect();
    Ok(Json(scores))
}

fn default_wait() -> bool {
    true
}

#[derive(Deserialize)]
struct SelectQuery {
    #[serde(default = "default_wait")]
    wait: bool,
}

async fn select_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<SelectQuery>,
) -> Result<Json<Selection>, ApiError> {
    let key = CountryKey::new(&name);
    Ok(Json(state.coordinator.select(key, q.wait).await?))
}

async fn country_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<HistoryPoint>>, ApiError> {
    let key = CountryKey::new(&name);
    Ok(Json(state.cache().history(&key).await?))
}

#[derive(Deserialize)]
struct StartReq {
    /// Omitted = every known country.
    #[serde(default)]
    countries: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct StartResp {
    added: usize,
    state: SchedulerSnapshot,
}

async fn start_ingest(
    State(state): State<AppState>,
    Json(body): Json<StartReq>,
) -> Result<(StatusCode, Json<StartResp>), ApiError> {
    let keys = match body.countries {
        Some(names) => names.iter().map(|n| CountryKey::new(n)).collect(),
        None => all_country_keys(),
    };
    let added = state.scheduler.start(keys, body.force).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResp {
            added,
            state: state.scheduler.state(),
        }),
    ))
}

#[derive(Deserialize)]
struct PrioritizeReq {
    country: String,
}

async fn prioritize(
    State(state): State<AppState>,
    Json(body): Json<PrioritizeReq>,
) -> Response {
    let key = CountryKey::new(&body.country);
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "country must not be empty").into_response();
    }
    state.scheduler.prioritize(key);
    (StatusCode::ACCEPTED, Json(state.scheduler.state())).into_response()
}

async fn status(State(state): State<AppState>) -> Json<SchedulerSnapshot> {
    Json(state.scheduler.state())
}
