//! Google Drive API client
//!
//! Provides a typed HTTP client for the Google Drive REST API. Handles
//! authentication headers, endpoint construction, and transparent retry of
//! throttled requests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use peersync_drive::client::DriveClient;
//!
//! # async fn example() -> Result<(), peersync_core::domain::ReplicationError> {
//! let client = DriveClient::new("access-token-here");
//! let meta = client.get_file_meta(&peersync_core::domain::FileId::new("abc")).await?;
//! println!("{}", meta.name);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use peersync_core::config::DEFAULT_API_ENDPOINT;
use peersync_core::domain::ReplicationError;

/// Maximum number of attempts for throttled requests
const MAX_ATTEMPTS: u32 = 4;

/// Base delay for the exponential backoff (doubles per attempt)
const BASE_DELAY_MS: u64 = 250;

/// Upper bound of the random jitter added to each backoff delay
const JITTER_MS: u64 = 200;

/// HTTP client for Google Drive API calls
///
/// Wraps `reqwest::Client` with bearer authentication and base URL
/// construction. Every call site routes through [`execute_with_retry`],
/// which absorbs HTTP 429 and 5xx responses with exponential backoff.
///
/// [`execute_with_retry`]: DriveClient::execute_with_retry
pub struct DriveClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    api_endpoint: String,
    /// Current OAuth2 bearer token
    auth_token: String,
}

impl DriveClient {
    /// Creates a client against the production endpoint
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self::with_api_endpoint(auth_token, DEFAULT_API_ENDPOINT)
    }

    /// Creates a client with a custom endpoint (used by tests)
    pub fn with_api_endpoint(auth_token: impl Into<String>, api_endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_endpoint: api_endpoint.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Updates the bearer token (e.g. after the host refreshed it)
    pub fn set_auth_token(&mut self, token: impl Into<String>) {
        self.auth_token = token.into();
        debug!("Updated DriveClient auth token");
    }

    /// Returns the configured API endpoint
    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    /// Creates an authenticated request builder for the given method and path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_endpoint, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.auth_token)
    }

    /// Executes a request with automatic retry on throttling
    ///
    /// HTTP 429 and 5xx responses are retried with
    /// `250·2^attempt ms + rand[0,200) ms` for up to [`MAX_ATTEMPTS`]
    /// attempts; after exhaustion [`ReplicationError::RateLimited`] is
    /// returned. Any other non-2xx response is surfaced immediately:
    /// 412 as [`ReplicationError::EtagMismatch`] (the conditional-write
    /// signal), everything else as [`ReplicationError::Fetch`].
    ///
    /// `build` is called once per attempt because a `RequestBuilder` is
    /// consumed on send.
    pub async fn execute_with_retry<F>(
        &self,
        operation: &str,
        build: F,
    ) -> Result<Response, ReplicationError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_status = 0u16;

        for attempt in 0..MAX_ATTEMPTS {
            let response = build()
                .send()
                .await
                .map_err(|e| ReplicationError::Http(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                if attempt > 0 {
                    info!(operation, attempt, "Request succeeded after retry");
                }
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_status = status.as_u16();
                if attempt + 1 < MAX_ATTEMPTS {
                    let delay = backoff_delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        status = last_status,
                        delay_ms = delay.as_millis() as u64,
                        "Throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break;
            }

            if status == StatusCode::PRECONDITION_FAILED {
                return Err(ReplicationError::EtagMismatch);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ReplicationError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        warn!(operation, attempts = MAX_ATTEMPTS, "Retry limit exhausted");
        Err(ReplicationError::RateLimited {
            status: last_status,
            attempts: MAX_ATTEMPTS,
        })
    }
}

/// Computes the backoff delay for one attempt
fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
    Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt) + jitter)
}
