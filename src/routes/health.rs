//! Health check routes
//!
//! Provides /health and /ready endpoints at root level for monitoring.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::routes::AppState;
use crate::services::store::AnyStore;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Readiness check response structure.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub store: String,
    pub timestamp: DateTime<Utc>,
}

async fn store_status(store: &AnyStore) -> &'static str {
    match store {
        AnyStore::InMemory(_) => "in-memory",
        AnyStore::Postgres(store) => match sqlx::query("SELECT 1").execute(store.pool()).await {
            Ok(_) => "connected",
            Err(e) => {
                tracing::warn!("Database health check failed: {}", e);
                "disconnected"
            }
        },
    }
}

/// GET /health - Health check endpoint
///
/// Always returns 200 OK but reports store connectivity in the body.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = store_status(&state.store).await;
    Json(HealthResponse {
        status: "ok".to_string(),
        store: store.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /ready - Readiness check endpoint
///
/// Returns 503 only when a configured Postgres store is unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = store_status(&state.store).await;
    let ready = store != "disconnected";
    let response = ReadyResponse {
        ready,
        store: store.to_string(),
        timestamp: Utc::now(),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
