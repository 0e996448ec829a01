//! HTTP API for health checks and broadcast inspection

use crate::config::ApiConfig;
use crate::error::{BroadcastError, BroadcastResult};
use crate::ledger::{BlockIdentifier, TransactionIdentifier};
use crate::tx::{AccountLockView, BroadcastRecord, BroadcastState, BroadcastStore};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: BroadcastStore,
    pub locks: AccountLockView,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: BroadcastStore) -> Self {
        Self {
            locks: AccountLockView::new(store.clone()),
            store,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/broadcasts", get(list_broadcasts))
        .route("/broadcasts/:hash", get(get_broadcast))
        .route("/locked", get(get_locked))
        .route("/locked/:address", get(get_account_lock))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, store: BroadcastStore) -> BroadcastResult<()> {
    let app = router(AppState::new(store));

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BroadcastError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BroadcastError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Readiness check - the backing store must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.database().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                database: true,
            }),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    database: false,
                }),
            )
        }
    }
}

async fn list_broadcasts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.store.get_all().await?;
    Ok(Json(
        records
            .iter()
            .map(BroadcastResponse::from)
            .collect::<Vec<_>>(),
    ))
}

async fn get_broadcast(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get(&TransactionIdentifier::new(hash)).await? {
        Some(record) => Ok(Json(BroadcastResponse::from(&record))),
        None => Err(ApiError::NotFound),
    }
}

async fn get_locked(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let addresses = state.locks.locked_addresses().await?;
    Ok(Json(LockedResponse {
        addresses: addresses.into_iter().collect(),
    }))
}

async fn get_account_lock(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let locked = state.locks.is_locked(&address).await?;
    Ok(Json(AccountLockResponse { address, locked }))
}

/// Counts by lifecycle state
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.store.get_all().await?;
    let pending = records.iter().filter(|r| r.is_pending()).count();
    let confirmed_recently = state.store.confirmations().await?.len();

    Ok(Json(StatsResponse {
        pending,
        submitted: records.len() - pending,
        confirmed_recently,
    }))
}

/// Maps store failures onto HTTP status codes
enum ApiError {
    NotFound,
    Internal(BroadcastError),
}

impl From<BroadcastError> for ApiError {
    fn from(e: BroadcastError) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "broadcast not tracked".to_string(),
                }),
            )
                .into_response(),
            ApiError::Internal(e) => {
                warn!("API request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: e.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

/// A tracked broadcast without its signed payload
#[derive(Serialize)]
struct BroadcastResponse {
    hash: String,
    sender: String,
    state: BroadcastState,
    operations: usize,
    last_broadcast: Option<BlockIdentifier>,
}

impl From<&BroadcastRecord> for BroadcastResponse {
    fn from(record: &BroadcastRecord) -> Self {
        Self {
            hash: record.identifier.hash.clone(),
            sender: record.sender.clone(),
            state: record.state(),
            operations: record.intent.len(),
            last_broadcast: record.last_broadcast.clone(),
        }
    }
}

#[derive(Serialize)]
struct LockedResponse {
    addresses: Vec<String>,
}

#[derive(Serialize)]
struct AccountLockResponse {
    address: String,
    locked: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    pending: usize,
    submitted: usize,
    confirmed_recently: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
