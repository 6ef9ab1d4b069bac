//! Signaling transport for WHIP (RFC 9725).
//!
//! The session hands a finished SDP offer to a [`SignalingTransport`] and
//! gets the raw HTTP outcome back; interpreting it is the session's job.

pub mod whip_client;

use async_trait::async_trait;
use thiserror::Error;

pub use whip_client::HttpTransport;

/// MIME type of WHIP offer and answer bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Errors below the HTTP status level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Outcome of an HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// 2xx
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// WHIP resource URL from the `Location` header, resolved against
    /// `endpoint` when relative.
    pub fn resource_url(&self, endpoint: &str) -> Option<String> {
        let location = self.header("Location")?;
        match url::Url::parse(endpoint) {
            Ok(base) => Some(
                base.join(location)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| location.to_string()),
            ),
            Err(_) => Some(location.to_string()),
        }
    }
}

/// One-shot HTTP exchange used for WHIP signaling
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// POST `body` to `url` with the given content type
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &str,
    ) -> Result<HttpResponse, TransportError>;

    /// DELETE `url` (WHIP session teardown)
    async fn delete(&self, url: &str) -> Result<HttpResponse, TransportError>;
}
