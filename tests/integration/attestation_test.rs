//! Integration tests for nonce issuance and attestation registration.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{assertions::assert_api_error, factories, TestApp};

#[tokio::test]
async fn issue_nonce_returns_a_base64_nonce_for_a_valid_device_id() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();

    let response = app
        .client
        .post(format!("{}/api/v1/attestation/nonce", app.base_url))
        .header("device-id", device_id)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let nonce = body.get("nonce").and_then(Value::as_str).unwrap();
    assert_eq!(nonce.len(), 44);
}

#[tokio::test]
async fn issue_nonce_rejects_missing_device_id_header() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/api/v1/attestation/nonce", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "INVALID_INPUT");
}

#[tokio::test]
async fn issue_nonce_rejects_malformed_device_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/api/v1/attestation/nonce", app.base_url))
        .header("device-id", "short")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "INVALID_INPUT");
}

#[tokio::test]
async fn register_attestation_without_a_prior_nonce_is_rejected() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();

    let response = app
        .client
        .post(format!("{}/api/v1/attestation", app.base_url))
        .header("device-id", device_id)
        .json(&json!({
            "keyId": factories::random_key_id(),
            "attestationObject": "AAAA",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "NO_PENDING_NONCE");
}

#[tokio::test]
async fn register_attestation_with_a_malformed_attestation_object_is_rejected() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();

    app.client
        .post(format!("{}/api/v1/attestation/nonce", app.base_url))
        .header("device-id", device_id.clone())
        .send()
        .await
        .unwrap();

    let response = app
        .client
        .post(format!("{}/api/v1/attestation", app.base_url))
        .header("device-id", device_id)
        .json(&json!({
            "keyId": factories::random_key_id(),
            "attestationObject": "not-valid-base64-cbor!!",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "MALFORMED_CBOR");
}

#[tokio::test]
async fn register_attestation_rejects_malformed_key_id() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();

    app.client
        .post(format!("{}/api/v1/attestation/nonce", app.base_url))
        .header("device-id", device_id.clone())
        .send()
        .await
        .unwrap();

    let response = app
        .client
        .post(format!("{}/api/v1/attestation", app.base_url))
        .header("device-id", device_id)
        .json(&json!({
            "keyId": "too-short",
            "attestationObject": "AAAA",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "INVALID_INPUT");
}
