//! Hub transport boundary
//!
//! `HubTransport` is the raw HTTP capability: one request in, one response out,
//! no retries. `RetryingTransport` layers retry budgets, backoff and failure
//! classification on top and is what every session call goes through.

pub mod http;
pub mod retry;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use http::ReqwestTransport;
pub use retry::{Backoff, CallKind, CallProfile, RetryingTransport};

/// Binary file part of a multipart upload.
///
/// The payload is reference counted: cloning a request for another attempt
/// shares the buffer instead of copying the checkpoint.
#[derive(Clone)]
pub struct FilePart {
    /// Multipart field name, also used as the file name (`last.pt`, `best.pt`)
    pub name: String,
    pub bytes: Bytes,
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// A single outbound request to the hub (or a dataset host)
#[derive(Debug, Clone)]
pub struct HubRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Per-attempt timeout, overwritten by `RetryingTransport` from the call profile
    pub timeout: Duration,
}

impl HubRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_multipart(mut self, fields: Vec<(String, String)>, file: FilePart) -> Self {
        self.body = RequestBody::Multipart { fields, file };
        self
    }
}

/// Response as seen by the session, regardless of status
#[derive(Debug, Clone)]
pub struct HubResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HubResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Build a response carrying a JSON document
    pub fn json_body(status: StatusCode, value: &Value) -> Self {
        let mut resp = Self::new(status, value.to_string());
        resp.headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        resp
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> crate::error::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Failure of a single request attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Build a status failure, keeping only the head of large bodies.
    pub fn from_response(resp: &HubResponse) -> Self {
        let mut body = resp.text();
        if body.len() > 512 {
            let mut end = 512;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        TransportError::Status {
            status: resp.status.as_u16(),
            body,
        }
    }

    /// Worth retrying: connectivity, timeouts, server overload.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Network(_) => {
                true
            }
            TransportError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::Request(_) => false,
        }
    }

    /// The hub could not be reached at all.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// Raw HTTP capability: send(method, url, headers, body) -> response.
///
/// Implementations return `Ok` for every response the server produced, whatever
/// its status; status classification happens in `RetryingTransport`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn send(&self, request: HubRequest) -> std::result::Result<HubResponse, TransportError>;
}
