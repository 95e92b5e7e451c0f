//! Integration tests for the assertion-auth-protected example route.

use serde_json::Value;

use crate::common::{assertions::assert_api_error, factories, TestApp};

#[tokio::test]
async fn whoami_rejects_request_missing_assertion_headers() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/api/v1/protected/whoami", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "INVALID_INPUT");
}

#[tokio::test]
async fn whoami_rejects_an_unattested_device() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();
    let key_id = factories::random_key_id();
    let now = chrono::Utc::now().timestamp();

    let response = app
        .client
        .get(format!("{}/api/v1/protected/whoami", app.base_url))
        .header("device-id", device_id)
        .header("key-id", key_id)
        .header("signature", "AAAA")
        .header("nonce", now.to_string())
        .header("assertion-inputs", "device-id")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "NO_KEY_FOR_DEVICE");
}

#[tokio::test]
async fn whoami_rejects_a_stale_nonce_header() {
    let app = TestApp::spawn().await;
    let device_id = factories::random_device_id();
    let key_id = factories::random_key_id();
    let stale = chrono::Utc::now().timestamp() - 10_000;

    let response = app
        .client
        .get(format!("{}/api/v1/protected/whoami", app.base_url))
        .header("device-id", device_id)
        .header("key-id", key_id)
        .header("signature", "AAAA")
        .header("nonce", stale.to_string())
        .header("assertion-inputs", "device-id")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_api_error(&body, "STALE_NONCE");
}
