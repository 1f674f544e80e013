//! Remote endpoint I/O.
//!
//! [`RemoteWriter`] is the seam the offline layer writes through;
//! [`HttpClient`] implements it over reqwest and also serves as a JSON
//! read fetcher.

use crate::queue::PendingRequest;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Header carrying the replay idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Remote I/O errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never got a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not finish in time.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// The endpoint could not be resolved against the base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The response body was not what the caller expected.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Status(status.as_u16())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// HTTP method of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(format!("unknown method: {s}")),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A write to send to the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub endpoint: String,
    pub method: Method,
    pub payload: Value,
    /// Set when replaying a queued write.
    pub idempotency_key: Option<String>,
}

impl WriteRequest {
    /// A first-attempt write.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, method: Method, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload,
            idempotency_key: None,
        }
    }

    /// The replay of a queued write, keyed by its id.
    #[must_use]
    pub fn replay(pending: &PendingRequest) -> Self {
        Self {
            endpoint: pending.endpoint.clone(),
            method: pending.method,
            payload: pending.payload.clone(),
            idempotency_key: Some(pending.id.clone()),
        }
    }
}

/// Outcome of a write that got a response.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl WriteResponse {
    /// A response with no body.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends writes to the remote.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Send one write.
    ///
    /// A non-2xx answer is a response, not an error.
    async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, RemoteError>;
}

/// JSON-over-HTTP client rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base: Url,
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or the client cannot be
    /// built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self { base, client })
    }

    /// Base URL every endpoint is resolved against.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve an endpoint such as `/api/notes` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn url(&self, endpoint: &str) -> Result<Url, RemoteError> {
        self.base
            .join(endpoint)
            .map_err(|e| RemoteError::InvalidUrl(format!("{endpoint}: {e}")))
    }

    /// GET `endpoint` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-2xx status or a body that
    /// does not decode as `T`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RemoteError> {
        let url = self.url(endpoint)?;
        trace!(url = %url, "GET");

        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteWriter for HttpClient {
    async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, RemoteError> {
        let url = self.url(&request.endpoint)?;

        let mut builder = self
            .client
            .request(request.method.into(), url.clone())
            .json(&request.payload);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // Bodies are informational; a non-JSON body is not a failure.
        let body = response.json::<Value>().await.ok();

        debug!(method = %request.method, url = %url, status, "Write sent");
        Ok(WriteResponse { status, body })
    }
}
