//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Login directory connection settings.
    pub network: NetworkConfig,
    /// Credentials and realm selection.
    pub account: AccountConfig,
    /// Movement and patrol settings.
    pub movement: MovementConfig,
    /// Area-of-interest settings.
    pub awareness: AwarenessConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Login directory connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Login directory host.
    pub login_host: String,
    /// Login directory port.
    pub login_port: u16,
    /// Delay before reconnecting after a failed or lost connection.
    pub reconnect_delay_ms: u64,
    /// Grace period between a malformed packet and termination.
    pub malformed_grace_ms: u64,
    /// How long to wait for a single handshake step.
    pub handshake_timeout_ms: u64,
}

/// Account configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountConfig {
    pub identity: String,
    pub password: String,
    /// Realm to join; empty picks the first realm listed.
    pub realm: String,
}

/// Movement configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MovementConfig {
    /// Heartbeat interval while moving (100..=500).
    pub heartbeat_interval_ms: u64,
    /// Distance at which a waypoint counts as reached.
    pub acceptance_radius: f32,
    /// Give up on a waypoint after this long.
    pub move_timeout_ms: u64,
    /// Patrol route, visited in order and then repeated.
    pub waypoints: Vec<[f32; 3]>,
}

/// Area-of-interest configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AwarenessConfig {
    /// Watch radius around the avatar.
    pub radius: f32,
    /// Leave the avatar itself out of the watched set.
    pub exclude_self: bool,
    /// Faction ids treated as attackable.
    pub hostile_factions: Vec<u32>,
    /// Whether creatures with no faction are attackable.
    pub unclassified_creatures_hostile: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            login_host: "127.0.0.1".to_string(),
            login_port: 3724,
            reconnect_delay_ms: 5_000,
            malformed_grace_ms: 3_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 250,
            acceptance_radius: 1.0,
            move_timeout_ms: 30_000,
            waypoints: Vec::new(),
        }
    }
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            radius: 40.0,
            exclude_self: true,
            hostile_factions: Vec::new(),
            unclassified_creatures_hostile: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Platform config directory for realmgate, e.g. `~/.config/realmgate`.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("realmgate"))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the session layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.identity.is_empty() {
            return Err(ConfigError::Invalid {
                field: "account.identity",
                reason: "must not be empty".to_string(),
            });
        }
        if !(100..=500).contains(&self.movement.heartbeat_interval_ms) {
            return Err(ConfigError::Invalid {
                field: "movement.heartbeat_interval_ms",
                reason: format!("{} is outside 100..=500", self.movement.heartbeat_interval_ms),
            });
        }
        if !(self.movement.acceptance_radius > 0.0) {
            return Err(ConfigError::Invalid {
                field: "movement.acceptance_radius",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.awareness.radius >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "awareness.radius",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.account.identity = "alice".to_string();
        config
    }

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("login_port: 3724"));
        assert!(ron_str.contains("heartbeat_interval_ms: 250"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (login_host: \"10.0.0.5\"), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.login_host, "10.0.0.5");
        assert_eq!(config.network.login_port, 3724);
        assert_eq!(config.awareness, AwarenessConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_waypoints_parse_as_tuples() {
        let ron_str = "(movement: (waypoints: [(1.0, 2.0, 0.0), (-3.5, 4.0, 1.0)]))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(
            config.movement.waypoints,
            vec![[1.0, 2.0, 0.0], [-3.5, 4.0, 1.0]]
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid();
        config.account.realm = "Stormhold".to_string();
        config.awareness.hostile_factions = vec![14, 16];
        config.movement.waypoints = vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]];

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.awareness.radius = 80.0;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.awareness.radius), Some(80.0));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(valid().validate().is_ok());
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::Invalid {
                field: "account.identity",
                ..
            })
        ));

        let mut config = valid();
        config.movement.heartbeat_interval_ms = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "movement.heartbeat_interval_ms",
                ..
            })
        ));

        let mut config = valid();
        config.movement.acceptance_radius = f32::NAN;
        assert!(config.validate().is_err());
    }
}
