//! Wires the offline subsystem together from configuration.

use std::sync::Arc;

use promptetheus_core::{
    init_store, ConnectivityMonitor, DraftStore, OperationStore, ReqwestTransport,
    ResponseCacheManager, Scheduler, SqliteCacheStorage, SyncEngine,
};

use crate::config::Config;
use crate::probe::ConnectivityProbe;

pub struct App {
    pub engine: Arc<SyncEngine>,
    pub cache: ResponseCacheManager,
    pub cache_storage: Arc<SqliteCacheStorage>,
    pub probe: ConnectivityProbe,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = init_store(&config.database_path.value).await?;
        tracing::debug!("Opened store at {}", config.database_path.value.display());
        let timeout = config.sync.request_timeout();

        // Unknown until the first probe
        let connectivity = Arc::new(ConnectivityMonitor::new(false));

        let mut api = ReqwestTransport::with_timeout(config.api_base_url(), timeout)?;
        let mut origin = ReqwestTransport::with_timeout(config.origin(), timeout)?;
        if let Some(token) = config.api_token() {
            api = api.with_api_token(token);
            origin = origin.with_api_token(token);
        }

        let engine = SyncEngine::new(
            pool.clone(),
            Arc::new(api),
            connectivity.clone(),
            Arc::new(Scheduler::new()),
        );

        let cache_storage = Arc::new(SqliteCacheStorage::new(pool));
        let cache = ResponseCacheManager::new(
            config.cache.to_cache_config().with_origin(config.origin()),
            cache_storage.clone(),
            Arc::new(origin),
        );

        let probe = ConnectivityProbe::new(config.origin(), connectivity);

        Ok(Self {
            engine,
            cache,
            cache_storage,
            probe,
        })
    }

    pub fn operations(&self) -> &OperationStore {
        self.engine.operations()
    }

    pub fn drafts(&self) -> &DraftStore {
        self.engine.drafts()
    }
}
