//! Transport seam: request/response shapes and the trait the scheduler
//! drives
//!
//! This crate is pure logic with zero protocol knowledge. The actual HTTP
//! client lives behind [`QueryTransport`], implemented by the application
//! (or by a scripted mock in tests).

use crate::error::QueryError;
use async_trait::async_trait;
use std::time::Duration;

/// An outbound request as the scheduler sees it
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// HTTP method, uppercase
    pub method: String,

    /// Absolute URL
    pub url: String,

    /// Request body, if any
    pub body: Option<String>,

    /// Extra headers beyond the content type
    pub headers: Vec<(String, String)>,

    /// Caller-supplied deadline; the scheduler applies its default when absent
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    /// A JSON POST, the shape every query to the backend takes
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            body: Some(body.into()),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The request's origin (`scheme://host[:port]`), the circuit-breaker key
    pub fn origin(&self) -> String {
        let url = self.url.as_str();
        let scheme_end = match url.find("://") {
            Some(idx) => idx + 3,
            None => return url.to_ascii_lowercase(),
        };
        let rest = &url[scheme_end..];
        let host_end = rest
            .find(['/', '?', '#'])
            .map(|idx| scheme_end + idx)
            .unwrap_or(url.len());
        url[..host_end].to_ascii_lowercase()
    }

    /// Canonical deduplication key over method, URL, and body
    pub fn canonical_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hasher.update(b"\n");
        if let Some(body) = &self.body {
            hasher.update(body.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A settled response. Status classification happens in the scheduler, so
/// the transport returns any HTTP status as `Ok`.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub status: u16,
    pub body: String,
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network transport the scheduler drives.
///
/// Implementations should translate connection-level failures into
/// [`QueryError::Network`] and leave HTTP status handling to the scheduler.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn send(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError>;
}
