//! `realmgate-bot`: log in, join a realm and patrol the configured waypoints,
//! logging every entity that comes into or leaves view.
//!
//! Run with: `cargo run -p realmgate-client -- --account alice --realm Stormhold`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use realmgate_awareness::AwarenessEvent;
use realmgate_client::{
    BotError, LoginSession, SessionSettings, WorldEvent, WorldSession, select_realm,
};
use realmgate_config::{CliArgs, Config, default_config_dir};
use realmgate_movement::{MoveRequest, MoveStatus};
use realmgate_net::{Clock, MonotonicClock};
use tracing::{error, info, warn};

/// Patrol tick.
const TICK: Duration = Duration::from_millis(50);

/// Run speed used until the server forces one.
const DEFAULT_RUN_SPEED: f32 = 7.0;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve config directory: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Start from the file (or defaults), then apply CLI overrides.
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Config unusable, falling back to defaults: {e}");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir: PathBuf = config_dir.join("logs");
    if let Err(e) =
        realmgate_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config))
    {
        eprintln!("Logging already initialized: {e}");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<(), BotError> {
    config.validate()?;
    let settings = SessionSettings::from_config(&config);
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    info!(
        "Logging in as {} at {}:{}",
        config.account.identity, config.network.login_host, config.network.login_port
    );
    let mut login = LoginSession::new(
        &config.account.identity,
        &config.account.password,
        settings.connector.clone(),
        Arc::clone(&clock),
    );
    login.connect(&config.network.login_host, config.network.login_port);
    let outcome = login.run(settings.handshake_timeout).await?;

    let realm = select_realm(&outcome.realms, &config.account.realm)?;
    let (host, port) = (realm.host.clone(), realm.port);
    info!("Joining realm {} at {host}:{port}", realm.name);

    let mut world = WorldSession::new(&outcome.identity, outcome.key, &settings, clock);
    world.connect(&host, port);
    world.wait_until_in_world(settings.handshake_timeout).await?;

    let waypoints: Vec<Vec3> = config
        .movement
        .waypoints
        .iter()
        .copied()
        .map(Vec3::from_array)
        .collect();
    let move_timeout = Duration::from_millis(config.movement.move_timeout_ms);
    let mut next = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                world.close();
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        world.poll()?;
        for event in world.drain_events() {
            log_world_event(&event);
        }
        for event in world.update_awareness() {
            match event {
                AwarenessEvent::Entered(guid) => {
                    info!(%guid, attackable = world.is_attackable(guid), "Entity in view");
                }
                AwarenessEvent::Left(guid) => info!(%guid, "Entity out of view"),
            }
        }

        // Waiting for a reconnect, or nothing to patrol.
        if !world.in_world() || waypoints.is_empty() {
            continue;
        }

        let request = MoveRequest {
            target: waypoints[next],
            acceptance_radius: config.movement.acceptance_radius,
            speed: DEFAULT_RUN_SPEED,
            timeout: move_timeout,
        };
        match world.move_towards(&request)? {
            MoveStatus::InProgress => {}
            MoveStatus::Succeeded => {
                info!(waypoint = next, "Waypoint reached");
                next = (next + 1) % waypoints.len();
            }
            MoveStatus::Failed => {
                warn!(waypoint = next, "Waypoint not reached in time, skipping");
                next = (next + 1) % waypoints.len();
            }
        }
    }
}

fn log_world_event(event: &WorldEvent) {
    match event {
        WorldEvent::Joined => info!("Realm accepted session"),
        WorldEvent::EnteredWorld { guid, position } => {
            info!(%guid, "Avatar at ({:.1}, {:.1}, {:.1})", position.x, position.y, position.z);
        }
        WorldEvent::Entity(change) => tracing::debug!(?change, "Entity change"),
        WorldEvent::SpeedForced {
            movement_type,
            speed,
        } => info!(?movement_type, speed, "Speed forced by server"),
        WorldEvent::Teleported { position } => {
            info!("Teleported to ({:.1}, {:.1}, {:.1})", position.x, position.y, position.z);
        }
        WorldEvent::Lost { reason } => warn!("Realm connection lost: {reason}"),
        WorldEvent::Reconnecting { attempt } => info!(attempt, "Reconnecting to realm"),
    }
}
