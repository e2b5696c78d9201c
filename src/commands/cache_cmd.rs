use clap::{Args, Subcommand};
use promptetheus_core::{CacheRequest, CacheStorage, LifecycleReport};
use serde_json::Value;

use super::OutputFormat;
use crate::app::App;

#[derive(Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand)]
pub enum CacheSubcommand {
    /// Precache the application shell and purge old generations
    Install,

    /// Purge cache generations from previous versions
    Activate,

    /// Fetch a path through the cache
    Get {
        /// Path relative to the server (e.g., /api/projects)
        path: String,

        /// Only print where the response came from
        #[arg(long, short)]
        quiet: bool,
    },

    /// List cache generations and their entries
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl CacheCommand {
    pub async fn run(&self, app: &App) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CacheSubcommand::Install => {
                let report = app.cache.install().await?;
                print_report(&report);
                Ok(())
            }

            CacheSubcommand::Activate => {
                let report = app.cache.activate().await?;
                print_report(&report);
                Ok(())
            }

            CacheSubcommand::Get { path, quiet } => {
                let fetched = app.cache.fetch(&CacheRequest::get(path.as_str())).await?;

                println!("{} ({})", fetched.response.status, fetched.source);
                if !quiet {
                    match fetched.response.parse_json::<Value>() {
                        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                        Err(_) => println!("{}", fetched.response.text()),
                    }
                }

                app.cache.flush().await;
                Ok(())
            }

            CacheSubcommand::List { format } => {
                let mut generations = Vec::new();
                for name in app.cache_storage.cache_names().await? {
                    let keys = app.cache_storage.keys(&name).await?;
                    generations.push((name, keys));
                }

                match format {
                    OutputFormat::Json => {
                        let map: serde_json::Map<String, Value> = generations
                            .into_iter()
                            .map(|(name, keys)| (name, Value::from(keys)))
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&map)?);
                    }
                    OutputFormat::Text => {
                        if generations.is_empty() {
                            println!("No cache generations.");
                            return Ok(());
                        }
                        for (name, keys) in &generations {
                            println!("{} ({} entries)", name, keys.len());
                            for key in keys {
                                println!("  {}", key);
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn print_report(report: &LifecycleReport) {
    println!("Precached: {} asset(s)", report.precached);
    if report.purged.is_empty() {
        println!("Purged:    none");
    } else {
        println!("Purged:    {}", report.purged.join(", "));
    }
}
