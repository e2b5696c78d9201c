use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("server_url: {}", config.server_url.value);
                        println!("  source: {}", config.server_url.source);
                        println!();

                        match &config.api_token {
                            Some(token) => {
                                println!("api_token: (set)");
                                println!("  source: {}", token.source);
                            }
                            None => println!("api_token: (not set)"),
                        }
                        println!();

                        println!("sync.auto_sync: {}", config.sync.auto_sync);
                        println!("sync.interval_ms: {}", config.sync.interval_ms);
                        println!(
                            "sync.request_timeout_secs: {}",
                            config.sync.request_timeout_secs
                        );
                        println!();

                        println!("cache.version: {}", config.cache.version);
                        println!("cache.api_prefix: {}", config.cache.api_prefix);
                        println!(
                            "cache.precache_manifest: {}",
                            config.cache.precache_manifest.join(", ")
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
