//! Classification of replay failures.

use serde_json::Value;
use thiserror::Error;

use crate::transport::{TransportError, TransportResponse};

/// Why replaying one queued operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// No response, transport failure or a 5xx status. Retained for the next pass.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// The server rejected the request as stated (4xx). Discarded.
    #[error("rejected by server ({status}): {reason}")]
    ClientRejection { status: u16, reason: String },

    /// The stored record has an unknown kind or method. Retained for inspection.
    #[error("cannot be replayed: {reason}")]
    Malformed { reason: String },
}

impl ReplayError {
    /// Classifies a non-success response. Returns `None` for 2xx.
    pub fn from_response(response: &TransportResponse) -> Option<Self> {
        if response.is_success() {
            return None;
        }

        let reason = describe_body(response);
        if response.is_client_error() {
            Some(ReplayError::ClientRejection {
                status: response.status,
                reason,
            })
        } else if response.is_server_error() {
            Some(ReplayError::Transient {
                reason: format!("server responded with status {}: {}", response.status, reason),
            })
        } else {
            Some(ReplayError::Transient {
                reason: format!("unexpected status {}: {}", response.status, reason),
            })
        }
    }

    /// Returns true if the operation can succeed on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReplayError::Transient { .. })
    }

    /// Returns true if the operation must be removed from the queue.
    pub fn discards_operation(&self) -> bool {
        matches!(self, ReplayError::ClientRejection { .. })
    }
}

impl From<TransportError> for ReplayError {
    fn from(e: TransportError) -> Self {
        ReplayError::Transient {
            reason: e.to_string(),
        }
    }
}

/// Short human-readable summary of an error response body.
fn describe_body(response: &TransportResponse) -> String {
    if let Ok(value) = response.parse_json::<Value>() {
        for field in ["error", "message"] {
            if let Some(text) = value.get(field).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }

    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        "no details".to_string()
    } else {
        text.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_is_not_an_error() {
        let response = TransportResponse::json(201, &json!({}));
        assert!(ReplayError::from_response(&response).is_none());
    }

    #[test]
    fn test_client_error_is_discarded() {
        let response = TransportResponse::json(404, &json!({ "error": "Intent not found" }));
        let err = ReplayError::from_response(&response).unwrap();

        assert_eq!(
            err,
            ReplayError::ClientRejection {
                status: 404,
                reason: "Intent not found".to_string()
            }
        );
        assert!(err.discards_operation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_error_is_transient() {
        let response = TransportResponse::new(502, None, b"Bad Gateway".to_vec());
        let err = ReplayError::from_response(&response).unwrap();

        assert!(err.is_retryable());
        assert!(!err.discards_operation());
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_redirect_status_is_transient() {
        let response = TransportResponse::new(302, None, Vec::new());
        let err = ReplayError::from_response(&response).unwrap();

        assert!(err.is_retryable());
        assert!(err.to_string().contains("unexpected status 302"));
    }

    #[test]
    fn test_transport_error_is_transient() {
        let err = ReplayError::from(TransportError::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_malformed_is_neither_retried_nor_discarded() {
        let err = ReplayError::Malformed {
            reason: "unknown method".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.discards_operation());
    }
}
