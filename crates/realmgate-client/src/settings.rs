//! Runtime settings derived from the on-disk configuration.

use std::time::Duration;

use realmgate_awareness::FactionHostilityPolicy;
use realmgate_config::Config;
use realmgate_movement::MovementConfig;
use realmgate_net::ConnectorConfig;

/// Everything a session needs besides credentials and a clock.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connector: ConnectorConfig,
    pub movement: MovementConfig,
    /// Upper bound for each handshake phase.
    pub handshake_timeout: Duration,
    pub awareness_radius: f32,
    pub exclude_self: bool,
    pub hostility: FactionHostilityPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            movement: MovementConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            awareness_radius: 40.0,
            exclude_self: true,
            hostility: FactionHostilityPolicy::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let connector = ConnectorConfig {
            reconnect_delay: Duration::from_millis(config.network.reconnect_delay_ms),
            termination_grace: Duration::from_millis(config.network.malformed_grace_ms),
            ..ConnectorConfig::default()
        };
        let hostility = FactionHostilityPolicy::new(config.awareness.hostile_factions.iter().copied())
            .with_unclassified_creatures_hostile(config.awareness.unclassified_creatures_hostile);
        Self {
            connector,
            movement: MovementConfig {
                heartbeat_interval: Duration::from_millis(config.movement.heartbeat_interval_ms),
            },
            handshake_timeout: Duration::from_millis(config.network.handshake_timeout_ms),
            awareness_radius: config.awareness.radius,
            exclude_self: config.awareness.exclude_self,
            hostility,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_maps_every_section() {
        let mut config = Config::default();
        config.network.reconnect_delay_ms = 1_500;
        config.movement.heartbeat_interval_ms = 400;
        config.awareness.radius = 75.0;
        config.awareness.hostile_factions = vec![16];
        config.awareness.unclassified_creatures_hostile = true;

        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.connector.reconnect_delay, Duration::from_millis(1_500));
        assert_eq!(settings.connector.termination_grace, Duration::from_secs(3));
        assert_eq!(settings.movement.heartbeat_interval, Duration::from_millis(400));
        assert_eq!(settings.awareness_radius, 75.0);
        assert!(settings.hostility.hostile_factions.contains(&16));
        assert!(settings.hostility.unclassified_creatures_hostile);
    }
}
