//! Microsoft Graph API client
//!
//! Provides a typed HTTP client for the Microsoft Graph API. Handles the
//! authentication header, endpoint construction and the mapping of HTTP
//! status codes onto [`GraphError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mirrordrive_graph::client::GraphClient;
//! use reqwest::Method;
//!
//! # async fn example() -> Result<(), mirrordrive_graph::GraphError> {
//! let client = GraphClient::new("access-token-here");
//! let response = client
//!     .execute_with_retry(|| client.request(Method::GET, "/me/drive/root"))
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::GraphError;

/// Base URL for Microsoft Graph API v1.0
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default retry-after duration when the header is missing
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Longest wait honoured from a `Retry-After` header
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Maximum number of retries for 429 responses
const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP client for Microsoft Graph API calls
///
/// Wraps `reqwest::Client` with the bearer token and base URL.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    access_token: String,
    max_retries: u32,
}

impl GraphClient {
    /// Creates a new GraphClient with the given access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, GRAPH_BASE_URL)
    }

    /// Creates a new GraphClient with a custom base URL (useful for testing)
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets how many times a throttled (429) request is repeated
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Updates the access token (e.g., after a token refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated GraphClient access token");
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request for a path relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.request_url(method, &url)
    }

    /// Creates an authenticated request for an absolute URL
    ///
    /// Used for `@odata.nextLink` pages and upload session URLs.
    pub fn request_url(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.access_token)
    }

    /// Creates an unauthenticated request for an absolute URL
    ///
    /// Upload session URLs are pre-authorized and reject a bearer token.
    pub(crate) fn anonymous_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Sends a request and maps an error status onto [`GraphError`]
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, GraphError> {
        let response = request.send().await?;
        check_status(response).await
    }

    /// Sends a request and deserializes the JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, GraphError> {
        let response = self.send(request).await?;
        parse_json(response).await
    }

    /// Executes a request, repeating it while the server answers 429
    ///
    /// `build` is called once per attempt since a sent request cannot be
    /// reused. The `Retry-After` header is honoured up to one minute.
    pub async fn execute_with_retry<F>(&self, build: F) -> Result<Response, GraphError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.send(build()).await {
                Err(GraphError::TooManyRequests { retry_after }) if attempt < self.max_retries => {
                    info!(
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Received 429, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
                Err(GraphError::TooManyRequests { retry_after }) => {
                    warn!(attempts = attempt + 1, "429 retry limit exhausted");
                    return Err(GraphError::TooManyRequests { retry_after });
                }
                other => {
                    if attempt > 0 && other.is_ok() {
                        info!(attempt, "Request succeeded after retry");
                    }
                    return other;
                }
            }
        }
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Map a non-success response onto a [`GraphError`]
pub(crate) async fn check_status(response: Response) -> Result<Response, GraphError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_string());

    debug!(status = status.as_u16(), "Graph request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED => GraphError::Unauthorized(body),
        StatusCode::FORBIDDEN => GraphError::Forbidden(body),
        StatusCode::NOT_FOUND => GraphError::NotFound(body),
        StatusCode::CONFLICT => GraphError::Conflict(body),
        StatusCode::PRECONDITION_FAILED => GraphError::PreconditionFailed(body),
        StatusCode::GONE => GraphError::ResyncRequired,
        StatusCode::TOO_MANY_REQUESTS => GraphError::TooManyRequests {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        s if s.is_server_error() => GraphError::ServerError(format!("{}: {body}", s.as_u16())),
        s => GraphError::Status {
            status: s.as_u16(),
            body,
        },
    })
}

pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, GraphError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GraphError::InvalidResponse(e.to_string()))
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}
