use clap::{Args, Subcommand};
use promptetheus_core::{HttpMethod, OperationKind, QueueEntry};

use super::OutputFormat;
use crate::app::App;

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// Queue a mutation for replay
    Add {
        /// Endpoint relative to the API base (e.g., /projects/3)
        endpoint: String,

        /// Operation kind (create, update, delete, forge, execute)
        #[arg(long, short, default_value = "create")]
        kind: OperationKind,

        /// HTTP method (GET, POST, PUT, DELETE)
        #[arg(long, short, default_value = "POST")]
        method: HttpMethod,

        /// JSON request body
        #[arg(long, short)]
        payload: Option<String>,
    },

    /// List queued operations in replay order
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the number of queued operations
    Count,

    /// Drop every queued operation
    Clear,
}

impl QueueCommand {
    pub async fn run(&self, app: &App) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            QueueSubcommand::Add {
                endpoint,
                kind,
                method,
                payload,
            } => {
                let payload = payload
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| format!("Invalid JSON payload: {}", e))?;

                let id = app
                    .engine
                    .enqueue(*kind, endpoint, *method, payload)
                    .await?;
                println!("Queued operation #{}: {} {} {}", id, kind, method, endpoint);
                Ok(())
            }

            QueueSubcommand::List { format } => {
                let entries = app.operations().list_ordered_by_creation().await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        if entries.is_empty() {
                            println!("No pending operations.");
                            return Ok(());
                        }
                        for entry in &entries {
                            println!("{}", entry);
                        }
                        let malformed = entries
                            .iter()
                            .filter(|e| matches!(e, QueueEntry::Malformed(_)))
                            .count();
                        println!();
                        println!("{} pending, {} malformed", entries.len(), malformed);
                        if let Some(oldest) = entries.iter().map(QueueEntry::created_at).min() {
                            println!("Oldest queued at {}", oldest.format("%Y-%m-%d %H:%M:%S"));
                        }
                    }
                }
                Ok(())
            }

            QueueSubcommand::Count => {
                println!("{}", app.engine.pending_count().await?);
                Ok(())
            }

            QueueSubcommand::Clear => {
                let removed = app.engine.clear_all().await?;
                println!("Removed {} pending operation(s)", removed);
                Ok(())
            }
        }
    }
}
