//! Two-tier response cache.
//!
//! A versioned precache generation holds the application shell, written
//! atomically at install. A runtime generation collects successful GET
//! responses as they pass through [`ResponseCacheManager::fetch`].

mod manager;
mod storage;

pub use manager::{
    CacheConfig, CacheRequest, FetchedResponse, LifecycleReport, LifecycleState, RequestClass,
    ResponseCacheManager, ResponseSource,
};
pub use storage::{CacheStorage, SqliteCacheStorage};

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A precache asset could not be fetched. Nothing was written.
    #[error("Failed to precache {asset}: {reason}")]
    InstallFailed { asset: String, reason: String },
}
