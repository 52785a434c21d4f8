//! ==============================================================================
//! server.rs - http transport for ingest and queries
//! ==============================================================================
//!
//! purpose:
//!     thin axum layer in front of the core. it decodes json, enforces the
//!     media type and body cap, and maps core outcomes to status codes.
//!
//! routes:
//!     POST /device                      ingest one batch for one device
//!     GET  /latest_timestamp?deviceId=  newest accepted reading timestamp
//!     GET  /cumulative_count?deviceId=  sum over distinct readings
//!     GET  /ping                        liveness
//!
//! relationships:
//!     - uses: ingest.rs (ReadingBatchProcessor), query.rs (QueryService)
//!     - used by: main.rs (run), tests/http_api.rs (router)
//!
//! ==============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::TelemetryConfig;
use crate::domain::RawReading;
use crate::error::{IngestError, QueryError};
use crate::ingest::{BatchResult, BatchStatus, ReadingBatchProcessor};
use crate::query::QueryService;
use crate::store::DeviceStore;
use crate::time_codec::TimeCodec;

// ==============================================================================
// shared state
// ==============================================================================
// both services hold the same Arc<DeviceStore>; cloning the state per request
// only bumps reference counts.

#[derive(Clone)]
pub struct AppState {
    pub ingest: ReadingBatchProcessor,
    pub queries: QueryService,
}

impl AppState {
    pub fn new(store: Arc<DeviceStore>) -> Self {
        Self {
            ingest: ReadingBatchProcessor::new(store.clone()),
            queries: QueryService::new(store),
        }
    }

    pub fn from_config(store: Arc<DeviceStore>, config: &TelemetryConfig) -> Self {
        let mut state = Self::new(store);
        state.ingest = state
            .ingest
            .with_device_state_logging(config.logging.log_device_state);
        state
    }
}

// ==============================================================================
// wire types
// ==============================================================================

/// body of POST /device
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceRequest {
    pub id: String,
    #[serde(default)]
    pub readings: Vec<RawReading>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: BatchStatus,
    #[serde(flatten)]
    pub result: BatchResult,
}

#[derive(Debug, Deserialize)]
pub struct DeviceParams {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
}

impl DeviceParams {
    fn require(self) -> Result<String, ApiError> {
        match self.device_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ApiError::MissingDeviceId),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LatestTimestampResponse {
    pub latest_timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CumulativeCountResponse {
    pub cumulative_count: i128,
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Content-Type header is not application/json")]
    UnsupportedMediaType,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no deviceId value found in query params")]
    MissingDeviceId,
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingDeviceId => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::EmptyDeviceId) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::DeviceNotFound(_)) => StatusCode::NOT_FOUND,
        };
        tracing::debug!(status = status.as_u16(), error = %self, "request rejected");

        let body = serde_json::json!({
            "status": "error",
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

// ==============================================================================
// router
// ==============================================================================

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/device", post(device_handler))
        .route("/latest_timestamp", get(latest_timestamp_handler))
        .route("/cumulative_count", get(cumulative_count_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until SIGINT or SIGTERM.
pub async fn run(config: &TelemetryConfig, store: Arc<DeviceStore>) -> anyhow::Result<()> {
    let state = AppState::from_config(store, config);
    let app = router(state, config.server.max_body_bytes);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

// ==============================================================================
// handlers
// ==============================================================================

async fn ping_handler() -> &'static str {
    "pong"
}

/// POST /device
/// 200 when every reading was usable, 400 when some were dropped
/// (the rest are committed either way)
async fn device_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    if !is_json(&headers) {
        return Err(ApiError::UnsupportedMediaType);
    }

    let request: DeviceRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::MalformedPayload(e.to_string()))?;

    let result = state.ingest.process(&request.id, request.readings).await?;
    let status = result.status();
    let code = match status {
        BatchStatus::FullyApplied => StatusCode::OK,
        BatchStatus::PartiallyApplied => StatusCode::BAD_REQUEST,
    };
    Ok((code, Json(IngestResponse { status, result })))
}

async fn latest_timestamp_handler(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<LatestTimestampResponse>, ApiError> {
    let device_id = params.require()?;
    let latest = state.queries.latest_timestamp(&device_id).await?;
    Ok(Json(LatestTimestampResponse {
        latest_timestamp: TimeCodec::format(&latest),
    }))
}

async fn cumulative_count_handler(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<CumulativeCountResponse>, ApiError> {
    let device_id = params.require()?;
    let cumulative_count = state.queries.cumulative_count(&device_id).await?;
    Ok(Json(CumulativeCountResponse { cumulative_count }))
}

/// `application/json`, parameters such as charset allowed
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
