use clap::Args;
use promptetheus_core::{CacheStorage, SyncStatus};
use serde::Serialize;

use super::OutputFormat;
use crate::app::App;

/// Show online state, queue depth and draft status counts
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct StatusReport {
    online: bool,
    pending_operations: i64,
    drafts_pending: usize,
    drafts_synced: usize,
    drafts_conflict: usize,
    precached_assets: usize,
}

impl StatusCommand {
    pub async fn run(&self, app: &App) -> Result<(), Box<dyn std::error::Error>> {
        let online = app.probe.check().await;
        let drafts = app.drafts().list().await?;
        let count = |status: SyncStatus| drafts.iter().filter(|d| d.sync_status == status).count();
        let precache_name = &app.cache.config().precache_name;

        let report = StatusReport {
            online,
            pending_operations: app.engine.pending_count().await?,
            drafts_pending: count(SyncStatus::Pending),
            drafts_synced: count(SyncStatus::Synced),
            drafts_conflict: count(SyncStatus::Conflict),
            precached_assets: app.cache_storage.keys(precache_name).await?.len(),
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                if report.online {
                    println!("● Online");
                } else {
                    println!("○ Offline - changes are queued and replayed on reconnect");
                }
                println!();
                println!("Pending operations: {}", report.pending_operations);
                println!(
                    "Drafts:             {} pending, {} synced, {} conflict",
                    report.drafts_pending, report.drafts_synced, report.drafts_conflict
                );
                println!(
                    "Precache:           {} ({} assets)",
                    precache_name, report.precached_assets
                );
            }
        }
        Ok(())
    }
}
