use clap::{Args, Subcommand};
use promptetheus_core::{DraftDocument, HttpMethod, NewOperation, OperationKind, SyncStatus};
use uuid::Uuid;

use super::OutputFormat;
use crate::app::App;

#[derive(Args)]
pub struct DraftCommand {
    #[command(subcommand)]
    pub command: DraftSubcommand,
}

#[derive(Subcommand)]
pub enum DraftSubcommand {
    /// Save a draft locally and queue the operation that publishes it
    Save {
        /// ID of the remote document this draft edits
        parent_id: String,

        /// Endpoint the draft is published to (e.g., /intents/4)
        endpoint: String,

        /// Draft body as JSON
        #[arg(long, short)]
        body: String,

        /// Draft ID to overwrite (a new one is generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Operation kind (create, update, delete, forge, execute)
        #[arg(long, short, default_value = "update")]
        kind: OperationKind,

        /// HTTP method (GET, POST, PUT, DELETE)
        #[arg(long, short, default_value = "PUT")]
        method: HttpMethod,
    },

    /// List drafts
    List {
        /// Only drafts of this remote document
        #[arg(long)]
        parent: Option<String>,

        /// Only drafts with this status (pending, synced, conflict)
        #[arg(long, short)]
        status: Option<SyncStatus>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a draft
    Show {
        /// Draft ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl DraftCommand {
    pub async fn run(&self, app: &App) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            DraftSubcommand::Save {
                parent_id,
                endpoint,
                body,
                id,
                kind,
                method,
            } => {
                let body: serde_json::Value = serde_json::from_str(body)
                    .map_err(|e| format!("Invalid JSON body: {}", e))?;
                let id = id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

                let draft = DraftDocument::new(id, parent_id.as_str(), body.clone());
                let op = NewOperation::new(*kind, *method, endpoint.as_str()).with_payload(body);
                let op_id = app.engine.stage_draft(&draft, op).await?;

                println!("Saved draft {} (operation #{})", draft.id, op_id);
                Ok(())
            }

            DraftSubcommand::List {
                parent,
                status,
                format,
            } => {
                let drafts = match (parent, status) {
                    (Some(parent_id), status) => {
                        let mut drafts = app.drafts().list_by_parent(parent_id).await?;
                        if let Some(status) = status {
                            drafts.retain(|d| d.sync_status == *status);
                        }
                        drafts
                    }
                    (None, Some(status)) => app.drafts().list_by_status(*status).await?,
                    (None, None) => app.drafts().list().await?,
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&drafts)?);
                    }
                    OutputFormat::Text => {
                        if drafts.is_empty() {
                            println!("No drafts found.");
                            return Ok(());
                        }
                        println!("{:<36}  {:<20}  {:<8}  UPDATED", "ID", "PARENT", "STATUS");
                        for draft in &drafts {
                            println!(
                                "{:<36}  {:<20}  {:<8}  {}",
                                draft.id,
                                draft.parent_id,
                                draft.sync_status.to_string(),
                                draft.updated_at.format("%Y-%m-%d %H:%M")
                            );
                        }
                    }
                }
                Ok(())
            }

            DraftSubcommand::Show { id, format } => {
                let draft = app
                    .drafts()
                    .get(id)
                    .await?
                    .ok_or_else(|| format!("Draft not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&draft)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", draft);
                    }
                }
                Ok(())
            }
        }
    }
}
