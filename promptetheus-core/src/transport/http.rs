//! `reqwest`-backed transport to the Promptetheus server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::{HttpTransport, TransportError, TransportResponse};
use crate::models::HttpMethod;

/// Timeout used when probing the server for reachability.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP transport rooted at a base URL, e.g. `http://localhost:3000/api`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl ReqwestTransport {
    /// Default per-request timeout. A stalled request becomes a transient failure.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins an endpoint path onto the base URL.
    pub fn url_for(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}/{}", base, endpoint)
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(endpoint);
        let mut request = self.client.request(method.into(), &url);

        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if method.has_body() {
            if let Some(payload) = payload {
                request = request.json(payload);
            }
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        tracing::debug!(%method, %url, status, "HTTP request completed");

        Ok(TransportResponse::new(status, content_type, body))
    }
}

/// Returns true if the server answers `GET /health` with a success status.
pub async fn check_server(server_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(HEALTH_CHECK_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };

    let url = format!("{}/health", server_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("Health check against {} failed: {}", url, e);
            false
        }
    }
}
