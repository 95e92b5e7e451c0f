//! Custom assertions for the App Attest API's error envelope.

use serde_json::Value;

/// Assert an API error response carries the expected error code.
pub fn assert_api_error(response: &Value, expected_code: &str) {
    let code = response
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("Missing error.code in response");

    assert_eq!(
        code, expected_code,
        "Expected error code '{expected_code}', got '{code}'"
    );
}

/// Assert response has request_id in meta.
pub fn assert_has_request_id(response: &Value) {
    let request_id = response.pointer("/meta/request_id").and_then(|v| v.as_str());

    assert!(request_id.is_some(), "Response missing meta.request_id");
}
