use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod config;
mod probe;

use app::App;
use commands::{
    CacheCommand, ConfigCommand, DraftCommand, QueueCommand, StatusCommand, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "promptetheus")]
#[command(version)]
#[command(about = "Offline queue, sync and cache for the Promptetheus client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage queued operations
    Queue(QueueCommand),

    /// Replay queued operations against the server
    Sync(SyncCommand),

    /// Manage the response cache
    Cache(CacheCommand),

    /// Manage local drafts
    Draft(DraftCommand),

    /// Show online state and pending work
    Status(StatusCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptetheus=info,promptetheus_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let app = App::open(&config).await?;
    match command {
        Commands::Queue(cmd) => cmd.run(&app).await?,
        Commands::Sync(cmd) => cmd.run(&app, &config).await?,
        Commands::Cache(cmd) => cmd.run(&app).await?,
        Commands::Draft(cmd) => cmd.run(&app).await?,
        Commands::Status(cmd) => cmd.run(&app).await?,
        Commands::Config(cmd) => cmd.run(&config)?,
    }

    Ok(())
}
