// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazarus_sw::error::ProxyError;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        ProxyError::Config("Bad origin".to_string()),
        ProxyError::UpstreamUnavailable("connection refused".to_string()),
        ProxyError::BadStatus {
            url: "/static/missing.js".to_string(),
            status: 404,
        },
        ProxyError::InstallFailed {
            version: "v2".to_string(),
            reason: "fetch failed".to_string(),
        },
        ProxyError::Storage("quota exceeded".to_string()),
        ProxyError::NoController,
        ProxyError::InvalidRequest("Bad request".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_bad_status_names_url_and_status() {
    let error = ProxyError::BadStatus {
        url: "/static/missing.js".to_string(),
        status: 404,
    };
    let display = error.to_string();
    assert!(display.contains("/static/missing.js"));
    assert!(display.contains("404"));
}

#[test]
fn test_install_failure_names_version() {
    let error = ProxyError::InstallFailed {
        version: "lazarus-v2".to_string(),
        reason: "Unexpected status 404 for /static/missing.js".to_string(),
    };
    assert!(error.to_string().contains("lazarus-v2"));
}

#[test]
fn test_only_rejected_fetches_are_network_failures() {
    assert!(ProxyError::UpstreamUnavailable("offline".to_string()).is_network_failure());
    assert!(!ProxyError::BadStatus {
        url: "/".to_string(),
        status: 500
    }
    .is_network_failure());
    assert!(!ProxyError::Storage("disk full".to_string()).is_network_failure());
}

#[test]
fn test_status_codes() {
    let cases = vec![
        (
            ProxyError::UpstreamUnavailable("offline".to_string()),
            StatusCode::BAD_GATEWAY,
        ),
        (ProxyError::InvalidRequest("too large".to_string()), StatusCode::BAD_REQUEST),
        (ProxyError::NoController, StatusCode::SERVICE_UNAVAILABLE),
        (
            ProxyError::Storage("disk full".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        assert_eq!(error.into_response().status(), expected);
    }
}

#[tokio::test]
async fn test_error_body_is_json() {
    let response = ProxyError::NoController.into_response();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["type"], "no_controller");
}
