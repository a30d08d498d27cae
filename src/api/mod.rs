use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::analyzer::{AnalyzeError, Analyzer};
use crate::error::EngineError;
use crate::models::{Address, Chain, RangeKey};
use crate::stats::{StatsSnapshot, ANALYZE_STATS};
use crate::storage::{self, CacheKey, DbPool, SingleFlight};

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub cache: Option<ResultCache>,
}

#[derive(Clone)]
pub struct ResultCache {
    pub pool: DbPool,
    pub ttl_secs: u64,
    pub flights: SingleFlight,
}

impl ResultCache {
    pub fn new(pool: DbPool, ttl_secs: u64) -> Self {
        Self {
            pool,
            ttl_secs,
            flights: SingleFlight::default(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    chain: Option<String>,
    address: Option<String>,
    range: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

pub enum ApiError {
    Analyze(AnalyzeError),
    Internal(anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Analyze(AnalyzeError::Engine(err))
    }
}

impl From<AnalyzeError> for ApiError {
    fn from(err: AnalyzeError) -> Self {
        ApiError::Analyze(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Analyze(AnalyzeError::Engine(err)) => {
                let status = if err.is_request_error() {
                    StatusCode::BAD_REQUEST
                } else if matches!(err, EngineError::AmountOverflow { .. }) {
                    StatusCode::UNPROCESSABLE_ENTITY
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status, err.kind(), err.to_string())
            }
            ApiError::Analyze(err @ AnalyzeError::Upstream(_)) => {
                (StatusCode::BAD_GATEWAY, err.kind(), err.to_string())
            }
            ApiError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{:#}", err),
            ),
        };

        ANALYZE_STATS.inc_rejected();
        if status.is_server_error() {
            tracing::warn!("analyze failed ({}): {}", kind, message);
        }
        (status, Json(ErrorBody { error: message, kind })).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats() -> Json<StatsSnapshot> {
    Json(ANALYZE_STATS.snapshot())
}

async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ANALYZE_STATS.inc_requests();

    let chain: Chain = query.chain.as_deref().unwrap_or("eth").parse()?;
    let address = Address::parse(query.address.as_deref().unwrap_or_default())?;
    let range: RangeKey = match query.range.as_deref() {
        Some(raw) => raw.parse()?,
        None => RangeKey::default(),
    };
    let now = chrono::Utc::now().timestamp();

    let Some(cache) = &state.cache else {
        let response = state.analyzer.run(&address, range, now).await?;
        return Ok(Json(serde_json::to_value(&response)?));
    };

    let key = CacheKey::new(chain, address.clone(), range, now, cache.ttl_secs);
    let _flight = cache.flights.acquire(&key).await;

    match storage::get_cached(&cache.pool, &key).await {
        Ok(Some(payload)) => {
            let mut body: serde_json::Value = serde_json::from_str(&payload)?;
            body["metadata"]["cached"] = serde_json::Value::Bool(true);
            ANALYZE_STATS.inc_cache_hits();
            tracing::debug!("cache hit for {} {}", address, range);
            return Ok(Json(body));
        }
        Ok(None) => {}
        Err(err) => tracing::warn!("cache lookup failed: {:#}", err),
    }

    let response = state.analyzer.run(&address, range, now).await?;
    let body = serde_json::to_value(&response)?;
    if let Err(err) = storage::put_cached(&cache.pool, &key, &body.to_string(), now).await {
        tracing::warn!("cache store failed: {:#}", err);
    }
    Ok(Json(body))
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", get(analyze))
        .route("/api/stats", get(stats))
        .with_state(state)
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([axum::http::Method::GET])
        .allow_credentials(true)
}

pub async fn run_http_server(addr: &str, state: AppState, origins: &[String]) -> Result<()> {
    let app = app_router(state).layer(cors_layer(origins));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
