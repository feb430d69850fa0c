//! Integration tests for retry and error mapping

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use peersync_core::domain::{Etag, FileId, ReplicationError};
use serde_json::json;

use crate::common;

#[tokio::test]
async fn test_retries_429_until_success() {
    let (server, client) = common::setup_drive_mock().await;

    // Two throttled responses, then success
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/throttled"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    common::mount_file_meta(&server, "throttled", "doc.json", "e1", "2026-01-15T10:00:00.000Z")
        .await;

    let meta = client
        .get_file_meta(&FileId::new("throttled"))
        .await
        .expect("retry should recover");
    assert_eq!(meta.etag.as_str(), "e1");
}

#[tokio::test]
async fn test_retries_5xx_until_success() {
    let (server, client) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_file_meta(&server, "flaky", "doc.json", "e2", "2026-01-15T10:00:00.000Z").await;

    let meta = client.get_file_meta(&FileId::new("flaky")).await.unwrap();
    assert_eq!(meta.etag.as_str(), "e2");
}

#[tokio::test]
async fn test_rate_limit_surfaces_after_exhaustion() {
    let (server, client) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/always-throttled"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client
        .get_file_meta(&FileId::new("always-throttled"))
        .await
        .unwrap_err();
    match err {
        ReplicationError::RateLimited { status, attempts } => {
            assert_eq!(status, 429);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_precondition_failed_maps_to_etag_mismatch() {
    let (server, client) = common::setup_drive_mock().await;

    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/tx"))
        .and(query_param("uploadType", "media"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let err = client
        .conditional_update_media(&FileId::new("tx"), &Etag::new("stale"), &json!({"holder": "a"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicationError::EtagMismatch));
}

#[tokio::test]
async fn test_unclassified_error_surfaces_status_and_body() {
    let (server, client) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/forbidden"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
        .mount(&server)
        .await;

    let err = client
        .get_file_meta(&FileId::new("forbidden"))
        .await
        .unwrap_err();
    match err {
        ReplicationError::Fetch { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body, "insufficient scope");
        }
        other => panic!("expected Fetch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_conditional_update_returns_new_etag_from_header() {
    let (server, client) = common::setup_drive_mock().await;

    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/tx"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("ETag", "\"fresh-etag\"")
                .set_body_json(json!({"id": "tx"})),
        )
        .mount(&server)
        .await;

    let etag = client
        .conditional_update_media(&FileId::new("tx"), &Etag::new("old"), &json!({"holder": "a"}))
        .await
        .unwrap();
    assert_eq!(etag.as_str(), "fresh-etag");
}
