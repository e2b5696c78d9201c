//! Sync CLI commands for replaying queued operations.

use clap::{Args, Subcommand};
use promptetheus_core::DrainSummary;

use super::OutputFormat;
use crate::app::App;
use crate::config::Config;
use crate::probe::PROBE_INTERVAL;

/// Replay queued operations against the server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,

    /// Keep syncing on a timer and on reconnect until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(&self, app: &App, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(app).await,
            Some(SyncSubcommand::Status) => self.status(app, config).await,
            Some(SyncSubcommand::Watch) => self.watch(app, config).await,
        }
    }

    async fn sync(&self, app: &App) -> Result<(), Box<dyn std::error::Error>> {
        app.probe.check().await;
        let summary = app.engine.drain().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Text => print_summary(&summary),
        }
        Ok(())
    }

    async fn status(&self, app: &App, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        println!("Server:    {}", config.origin());
        println!("API base:  {}", config.api_base_url());
        println!(
            "API token: {}",
            if config.api_token().is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!(
            "Auto-sync: {} (every {} ms)",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            },
            config.sync.interval_ms
        );
        println!();

        println!("Pending:   {}", app.engine.pending_count().await?);
        print!("Server status: ");
        if app.probe.check().await {
            println!("✓ reachable");
        } else {
            println!("✗ unreachable");
        }

        Ok(())
    }

    async fn watch(&self, app: &App, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.auto_sync {
            println!("Auto-sync is disabled in the configuration.");
            return Ok(());
        }

        // Catch up before handing over to the timer
        if app.probe.check().await {
            print_summary(&app.engine.drain().await);
        }

        let probe = app.probe.clone().spawn(PROBE_INTERVAL);
        app.engine.start_auto_sync(config.sync.interval());
        println!(
            "Watching for changes (every {} ms). Press Ctrl-C to stop.",
            config.sync.interval_ms
        );

        tokio::signal::ctrl_c().await?;

        probe.abort();
        app.engine.stop_auto_sync();
        println!();
        println!("Stopped. {} operation(s) still pending.", app.engine.pending_count().await?);
        Ok(())
    }
}

fn print_summary(summary: &DrainSummary) {
    if summary.synced == 0 && summary.failed == 0 && summary.errors.is_empty() {
        println!("Nothing to sync.");
        return;
    }

    println!("  ✓ {} synced", summary.synced);
    if summary.failed > 0 {
        println!("  ✗ {} failed", summary.failed);
    }
    for error in &summary.errors {
        println!("    {}", error);
    }
}
