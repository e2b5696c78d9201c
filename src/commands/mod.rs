mod cache_cmd;
mod config_cmd;
mod draft;
mod queue;
mod status;
mod sync_cmd;

use clap::ValueEnum;

pub use cache_cmd::CacheCommand;
pub use config_cmd::ConfigCommand;
pub use draft::DraftCommand;
pub use queue::QueueCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
