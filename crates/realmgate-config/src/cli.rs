//! Command-line argument parsing for the realmgate bot.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// realmgate bot command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "realmgate-bot", about = "Unattended realm client")]
pub struct CliArgs {
    /// Login directory host.
    #[arg(long)]
    pub host: Option<String>,

    /// Login directory port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Account identity.
    #[arg(long)]
    pub account: Option<String>,

    /// Account password. Prefer the config file or `REALMGATE_PASSWORD`.
    #[arg(long, env = "REALMGATE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Realm to join.
    #[arg(long)]
    pub realm: Option<String>,

    /// Area watch radius.
    #[arg(long)]
    pub radius: Option<f32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.host {
            self.network.login_host = host.clone();
        }
        if let Some(port) = args.port {
            self.network.login_port = port;
        }
        if let Some(ref account) = args.account {
            self.account.identity = account.clone();
        }
        if let Some(ref password) = args.password {
            self.account.password = password.clone();
        }
        if let Some(ref realm) = args.realm {
            self.account.realm = realm.clone();
        }
        if let Some(radius) = args.radius {
            self.awareness.radius = radius;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
