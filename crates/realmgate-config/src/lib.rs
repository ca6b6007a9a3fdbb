//! Configuration for realmgate sessions and the bot binary.
//!
//! Settings persist to disk as `config.ron`. Every section carries defaults,
//! so partial or older files still load; CLI flags override file values.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    AccountConfig, AwarenessConfig, Config, DebugConfig, MovementConfig, NetworkConfig,
    default_config_dir,
};
pub use error::ConfigError;
