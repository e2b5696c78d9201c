//! Feeds the connectivity monitor from server health checks.

use std::sync::Arc;
use std::time::Duration;

use promptetheus_core::{check_server, ConnectivityMonitor};
use tokio::task::JoinHandle;

/// How often `sync watch` re-checks reachability.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ConnectivityProbe {
    server_url: String,
    monitor: Arc<ConnectivityMonitor>,
}

impl ConnectivityProbe {
    pub fn new(server_url: impl Into<String>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            server_url: server_url.into(),
            monitor,
        }
    }

    /// Probes the server once and records the result.
    pub async fn check(&self) -> bool {
        let online = check_server(&self.server_url).await;
        self.monitor.set_online(online);
        online
    }

    /// Probes on a fixed period until the task is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.check().await;
            }
        })
    }
}
