//! Promptetheus Core Library
//!
//! The offline synchronization subsystem of the Promptetheus client:
//! a durable mutation queue, a single-flight replay engine and a two-tier
//! response cache.

pub mod cache;
pub mod connectivity;
pub mod models;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    CacheConfig, CacheError, CacheRequest, CacheStorage, FetchedResponse, LifecycleReport,
    LifecycleState, RequestClass, ResponseCacheManager, ResponseSource, SqliteCacheStorage,
};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use models::{
    DraftDocument, HttpMethod, MalformedOperation, NewOperation, OperationKind, PendingOperation,
    QueueEntry, SyncStatus,
};
pub use store::{init_store, DraftStore, OperationStore, StoreError};
pub use sync::{DrainSummary, ReplayError, Scheduler, SyncEngine, DEFAULT_SYNC_INTERVAL};
pub use transport::{check_server, HttpTransport, ReqwestTransport, TransportError, TransportResponse};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
