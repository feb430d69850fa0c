//! Shared test helpers for Drive adapter integration tests
//!
//! Provides wiremock-based mock server setup for the Drive REST endpoints.

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use peersync_drive::client::DriveClient;

/// Enables log output for debugging; safe to call from every test
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a mock server and a client pointed at it
pub async fn setup_drive_mock() -> (MockServer, DriveClient) {
    let server = MockServer::start().await;
    let client = DriveClient::with_api_endpoint("test-access-token", server.uri());
    (server, client)
}

/// Mounts a `files.list` response for an exact `q` string
pub async fn mount_list(server: &MockServer, q: &str, files: serde_json::Value, times: Option<u64>) {
    let mut mock = Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", q))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": files
        })));
    if let Some(n) = times {
        mock = mock.up_to_n_times(n);
    }
    mock.mount(server).await;
}

/// Mounts a metadata `files.get` response with an `ETag` header
pub async fn mount_file_meta(
    server: &MockServer,
    file_id: &str,
    name: &str,
    etag: &str,
    modified_time: &str,
) {
    Mock::given(method("GET"))
        .and(path(format!("/drive/v3/files/{file_id}")))
        .and(query_param("fields", "id,name,version,modifiedTime,createdTime,trashed"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("ETag", format!("\"{etag}\""))
                .set_body_json(serde_json::json!({
                    "id": file_id,
                    "name": name,
                    "modifiedTime": modified_time,
                    "createdTime": modified_time,
                    "trashed": false
                })),
        )
        .mount(server)
        .await;
}
