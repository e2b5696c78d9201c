use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::storage::CacheStorage;
use super::CacheError;
use crate::models::HttpMethod;
use crate::transport::{HttpTransport, TransportError, TransportResponse};

const CACHE_PREFIX: &str = "promptetheus";

/// Names and routing rules for the response cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Versioned generation holding the application shell.
    pub precache_name: String,
    /// Generation filled from live GET responses.
    pub runtime_name: String,
    /// Paths under this prefix are API reads and go to the network first.
    pub api_prefix: String,
    pub precache_manifest: Vec<String>,
    /// Origin the cached paths belong to (e.g. `https://app.example.com`).
    /// Absolute URLs naming any other origin are never cached or rewritten.
    pub origin: Option<String>,
}

impl CacheConfig {
    pub const DEFAULT_VERSION: &'static str = "v1";

    pub fn for_version(version: &str) -> Self {
        Self {
            precache_name: format!("{}-{}", CACHE_PREFIX, version),
            runtime_name: format!("{}-runtime", CACHE_PREFIX),
            api_prefix: "/api/".to_string(),
            precache_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_version(Self::DEFAULT_VERSION)
    }
}

/// An outbound request as seen by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub method: HttpMethod,
    /// Either an origin-relative path or an absolute URL.
    pub url: String,
    pub payload: Option<Value>,
}

impl CacheRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The URL scheme, if the request carries an absolute URL.
    pub fn scheme(&self) -> Option<&str> {
        if self.url.starts_with('/') {
            return None;
        }
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }

    fn is_http(&self) -> bool {
        self.scheme()
            .map_or(true, |s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"))
    }

    /// Path and query relative to the origin. Used as the cache key.
    pub fn path(&self) -> String {
        match self.url.split_once("://") {
            Some((_, rest)) if self.scheme().is_some() => match rest.find('/') {
                Some(start) => rest[start..].to_string(),
                None => "/".to_string(),
            },
            _ if self.url.starts_with('/') => self.url.clone(),
            _ => format!("/{}", self.url),
        }
    }
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Non-GET, non-http(s) or another origin. Never cached.
    PassThrough,
    /// API reads: network, then runtime cache, then a synthesized offline response.
    NetworkFirst,
    /// Static assets: any cached generation, then network.
    CacheFirst,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Runtime,
    Precache,
    Offline,
    PassThrough,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::Runtime => write!(f, "runtime cache"),
            ResponseSource::Precache => write!(f, "precache"),
            ResponseSource::Offline => write!(f, "offline fallback"),
            ResponseSource::PassThrough => write!(f, "pass-through"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub response: TransportResponse,
    pub source: ResponseSource,
}

impl FetchedResponse {
    fn new(response: TransportResponse, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Installed,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Installed => write!(f, "installed"),
            LifecycleState::Active => write!(f, "active"),
        }
    }
}

/// Result of an install or activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    /// Entries held by the precache generation.
    pub precached: usize,
    /// Generations deleted during activation.
    pub purged: Vec<String>,
}

/// Routes GET requests through the cache generations.
pub struct ResponseCacheManager {
    config: CacheConfig,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<LifecycleState>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl ResponseCacheManager {
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            storage,
            transport,
            state: Mutex::new(LifecycleState::Idle),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn precache_manifest(&self) -> &[String] {
        &self.config.precache_manifest
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Returns true for relative URLs and absolute URLs naming the configured origin.
    fn is_same_origin(&self, request: &CacheRequest) -> bool {
        if request.scheme().is_none() {
            return true;
        }
        let Some(origin) = self.config.origin.as_deref() else {
            return false;
        };
        match (Url::parse(&request.url), Url::parse(origin)) {
            (Ok(url), Ok(origin)) => url.origin() == origin.origin(),
            _ => false,
        }
    }

    pub fn classify(&self, request: &CacheRequest) -> RequestClass {
        if request.method != HttpMethod::Get || !request.is_http() || !self.is_same_origin(request)
        {
            RequestClass::PassThrough
        } else if request.path().starts_with(&self.config.api_prefix) {
            RequestClass::NetworkFirst
        } else {
            RequestClass::CacheFirst
        }
    }

    /// Fetches the precache manifest and activates.
    ///
    /// Does nothing but activate when the precache generation is already
    /// populated. Otherwise every asset must answer 2xx before anything is
    /// written.
    pub async fn install(&self) -> Result<LifecycleReport, CacheError> {
        let existing = self.storage.keys(&self.config.precache_name).await?;

        let precached = if existing.is_empty() {
            let mut entries = Vec::with_capacity(self.config.precache_manifest.len());
            for asset in &self.config.precache_manifest {
                let response = self
                    .transport
                    .send(HttpMethod::Get, asset, None)
                    .await
                    .map_err(|e| CacheError::InstallFailed {
                        asset: asset.clone(),
                        reason: e.to_string(),
                    })?;
                if !response.is_success() {
                    return Err(CacheError::InstallFailed {
                        asset: asset.clone(),
                        reason: format!("server responded with status {}", response.status),
                    });
                }
                entries.push((asset.clone(), response));
            }

            self.storage
                .put_all(&self.config.precache_name, &entries)
                .await?;
            tracing::info!(
                "Precached {} asset(s) into {}",
                entries.len(),
                self.config.precache_name
            );
            entries.len()
        } else {
            tracing::debug!("{} already populated", self.config.precache_name);
            existing.len()
        };

        self.set_state(LifecycleState::Installed);
        let mut report = self.activate().await?;
        report.precached = precached;
        Ok(report)
    }

    /// Deletes every generation other than the current precache and runtime ones.
    pub async fn activate(&self) -> Result<LifecycleReport, CacheError> {
        let mut purged = Vec::new();
        for name in self.storage.cache_names().await? {
            if name == self.config.precache_name || name == self.config.runtime_name {
                continue;
            }
            if self.storage.delete(&name).await? {
                tracing::info!("Purged stale cache generation {}", name);
                purged.push(name);
            }
        }

        self.set_state(LifecycleState::Active);
        let precached = self.storage.keys(&self.config.precache_name).await?.len();
        Ok(LifecycleReport { precached, purged })
    }

    pub async fn fetch(&self, request: &CacheRequest) -> Result<FetchedResponse, CacheError> {
        match self.classify(request) {
            RequestClass::PassThrough => self.pass_through(request).await,
            RequestClass::NetworkFirst => Ok(self.network_first(request).await),
            RequestClass::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn pass_through(&self, request: &CacheRequest) -> Result<FetchedResponse, CacheError> {
        if !request.is_http() {
            let scheme = request.scheme().unwrap_or_default().to_string();
            return Err(TransportError::UnsupportedScheme(scheme).into());
        }
        if !self.is_same_origin(request) {
            return Err(TransportError::ForeignOrigin(request.url.clone()).into());
        }

        let response = self
            .transport
            .send(request.method, &request.path(), request.payload.as_ref())
            .await?;
        Ok(FetchedResponse::new(response, ResponseSource::PassThrough))
    }

    async fn network_first(&self, request: &CacheRequest) -> FetchedResponse {
        let key = request.path();

        match self.transport.send(HttpMethod::Get, &key, None).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_in_background(key, &response);
                }
                FetchedResponse::new(response, ResponseSource::Network)
            }
            Err(e) => {
                tracing::debug!("Network unavailable for {}: {}", key, e);
                match self.storage.match_in(&self.config.runtime_name, &key).await {
                    Ok(Some(cached)) => FetchedResponse::new(cached, ResponseSource::Runtime),
                    Ok(None) => FetchedResponse::new(TransportResponse::offline(), ResponseSource::Offline),
                    Err(e) => {
                        tracing::warn!("Cache lookup for {} failed: {}", key, e);
                        FetchedResponse::new(TransportResponse::offline(), ResponseSource::Offline)
                    }
                }
            }
        }
    }

    async fn cache_first(&self, request: &CacheRequest) -> Result<FetchedResponse, CacheError> {
        let key = request.path();

        match self.storage.match_any(&key).await {
            Ok(Some((name, cached))) => {
                let source = if name == self.config.runtime_name {
                    ResponseSource::Runtime
                } else {
                    ResponseSource::Precache
                };
                return Ok(FetchedResponse::new(cached, source));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache lookup for {} failed: {}", key, e),
        }

        let response = self.transport.send(HttpMethod::Get, &key, None).await?;
        if response.is_success() {
            self.store_in_background(key, &response);
        }
        Ok(FetchedResponse::new(response, ResponseSource::Network))
    }

    /// Writes a copy into the runtime generation without delaying the caller.
    fn store_in_background(&self, key: String, response: &TransportResponse) {
        let storage = self.storage.clone();
        let name = self.config.runtime_name.clone();
        let response = response.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = storage.put(&name, &key, &response).await {
                tracing::warn!("Failed to cache {}: {}", key, e);
            }
        });

        let mut pending = self.pending_writes.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Waits for background cache writes started so far.
    ///
    /// Short-lived callers use this before the runtime shuts down.
    pub async fn flush(&self) {
        let handles: Vec<_> = self
            .pending_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
