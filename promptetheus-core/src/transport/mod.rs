//! HTTP transport abstraction.
//!
//! The sync engine and the response cache only talk to the network through
//! [`HttpTransport`]. Non-2xx statuses are ordinary responses; only failures
//! to get a response at all are [`TransportError`]s.

mod http;

pub use http::{check_server, ReqwestTransport};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::HttpMethod;

/// Errors raised when no response could be obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Refusing request to another origin: {0}")]
    ForeignOrigin(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// A response as seen at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    /// Builds a JSON response with the given status.
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    /// The response served for API reads when neither network nor cache can answer.
    pub fn offline() -> Self {
        Self::json(
            503,
            &json!({ "offline": true, "error": "No network connection" }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Sends requests to the remote service.
///
/// `endpoint` is a path (with optional query) relative to the transport's
/// base URL. Implementations must not retry on their own.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_response_shape() {
        let response = TransportResponse::offline();
        assert_eq!(response.status, 503);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));

        let body: Value = response.parse_json().unwrap();
        assert_eq!(body["offline"], json!(true));
        assert_eq!(body["error"], json!("No network connection"));
    }

    #[test]
    fn test_status_classes() {
        let ok = TransportResponse::new(204, None, Vec::new());
        assert!(ok.is_success());

        let not_found = TransportResponse::new(404, None, Vec::new());
        assert!(not_found.is_client_error());
        assert!(!not_found.is_success());

        let bad_gateway = TransportResponse::new(502, None, Vec::new());
        assert!(bad_gateway.is_server_error());
    }
}
