//! Route modules and router assembly.
//!
//! Structure kept from the teacher: health endpoints at root level,
//! feature endpoints nested under a versioned prefix. `AppState` carries
//! [`AnyStore`] rather than a raw `PgPool`, since the storage backend is
//! now a runtime choice (SPEC_FULL.md §3, §8).

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use crate::config::Config;
use crate::middleware::assertion_auth::AssertionAuthLayer;
use crate::services::store::AnyStore;

pub mod attestation;
pub mod health;
pub mod protected;

#[derive(Clone)]
pub struct AppState {
    pub store: AnyStore,
    pub config: Arc<Config>,
}

/// Creates the main API router with all routes.
///
/// Route structure:
/// - `/health`, `/ready` - health checks (root level)
/// - `/api/v1/attestation/nonce` - nonce issuance
/// - `/api/v1/attestation` - attestation registration
/// - `/api/v1/protected/whoami` - illustrative assertion-protected route
pub fn api_router(state: AppState) -> Router {
    let health_router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .with_state(state.clone());

    let attestation_router = Router::new()
        .route("/attestation/nonce", post(attestation::issue_nonce))
        .route("/attestation", post(attestation::register_attestation))
        .with_state(state.clone());

    let protected_router = Router::new()
        .route("/protected/whoami", get(protected::whoami))
        .layer(ServiceBuilder::new().layer(AssertionAuthLayer::new(
            state.store.clone(),
            state.config.clone(),
        )))
        .with_state(state);

    let v1_router = Router::new()
        .merge(attestation_router)
        .merge(protected_router);

    Router::new()
        .merge(health_router)
        .nest("/api/v1", v1_router)
}
