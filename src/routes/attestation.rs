//! Nonce issuance and attestation registration routes (SPEC_FULL.md §4.2, §6).

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiErrorWithRequestId, CoreError};
use crate::routes::AppState;
use crate::services::attestation::verify_attestation;
use crate::services::store::Store;
use crate::validation::{validate_device_id, validate_key_id};

const HEADER_DEVICE_ID: &str = "device-id";

fn device_id_from_headers(headers: &HeaderMap) -> Result<&str, CoreError> {
    let device_id = headers
        .get(HEADER_DEVICE_ID)
        .ok_or_else(|| CoreError::InvalidInput("missing `device-id` header".to_string()))?
        .to_str()
        .map_err(|_| CoreError::InvalidInput("`device-id` header is not valid UTF-8".to_string()))?;
    validate_device_id(device_id).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
    Ok(device_id)
}

#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub nonce: String,
}

/// POST /attestation/nonce — issues a fresh base64 challenge for the
/// device named in the `device-id` header (SPEC_FULL.md §4.2 step 1).
pub async fn issue_nonce(
    State(state): State<AppState>,
    request_id: Option<axum::Extension<Uuid>>,
    headers: HeaderMap,
) -> Result<Json<NonceResponse>, ApiErrorWithRequestId> {
    let request_id = request_id.map(|axum::Extension(id)| id).unwrap_or_else(Uuid::new_v4);
    let respond = |error: CoreError| ApiErrorWithRequestId { error, request_id };

    let device_id = device_id_from_headers(&headers).map_err(respond)?;

    let nonce = state
        .store
        .issue_nonce(device_id)
        .await
        .map_err(CoreError::from)
        .map_err(respond)?;

    Ok(Json(NonceResponse { nonce }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterAttestationRequest {
    #[serde(rename = "keyId")]
    pub key_id: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterAttestationResponse {}

/// POST /attestation — verifies and persists a device's attestation
/// (SPEC_FULL.md §4.2). The nonce bound into the attested certificate is
/// the one most recently issued to this `device-id` and not yet consumed.
pub async fn register_attestation(
    State(state): State<AppState>,
    request_id: Option<axum::Extension<Uuid>>,
    headers: HeaderMap,
    Json(body): Json<RegisterAttestationRequest>,
) -> Result<Json<RegisterAttestationResponse>, ApiErrorWithRequestId> {
    let request_id = request_id.map(|axum::Extension(id)| id).unwrap_or_else(Uuid::new_v4);
    let respond = |error: CoreError| ApiErrorWithRequestId { error, request_id };

    let device_id = device_id_from_headers(&headers).map_err(respond)?;

    validate_key_id(&body.key_id)
        .map_err(|e| CoreError::InvalidInput(e.to_string()))
        .map_err(respond)?;

    let nonce = state
        .store
        .lookup_pending_nonce(device_id)
        .await
        .map_err(CoreError::from)
        .map_err(respond)?
        .ok_or(CoreError::NoPendingNonce)
        .map_err(respond)?;

    let result = verify_attestation(
        &body.attestation_object,
        &body.key_id,
        &nonce,
        &state.config,
        &request_id.to_string(),
    )
    .await
    .map_err(CoreError::from)
    .map_err(respond)?;

    state
        .store
        .upsert_attestation(device_id, &result.key_id_b64, &result.public_key_pem)
        .await
        .map_err(CoreError::from)
        .map_err(respond)?;

    tracing::info!(
        request_id = %request_id,
        device_id,
        "attestation registered"
    );

    Ok(Json(RegisterAttestationResponse {}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_from_headers_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(device_id_from_headers(&headers).is_err());
    }

    #[test]
    fn device_id_from_headers_rejects_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DEVICE_ID, "bad id!".parse().unwrap());
        assert!(device_id_from_headers(&headers).is_err());
    }

    #[test]
    fn device_id_from_headers_accepts_valid_format() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DEVICE_ID, "device-0001".parse().unwrap());
        assert_eq!(device_id_from_headers(&headers).unwrap(), "device-0001");
    }
}
