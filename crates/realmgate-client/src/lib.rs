//! Headless realm client: logs in to the directory, joins a realm, walks the
//! avatar around and keeps track of what is nearby.
//!
//! [`LoginSession`] and [`WorldSession`] each own one
//! [`TransportConnector`](realmgate_net::TransportConnector) and are driven
//! by polling; neither spawns tasks of its own beyond the connector's.

pub mod error;
pub mod login;
pub mod messages;
mod outbox;
pub mod settings;
pub mod state;
pub mod world;

pub use error::BotError;
pub use login::{LoginOutcome, LoginSession, select_realm};
pub use messages::EnterWorld;
pub use settings::SessionSettings;
pub use state::ConnectionState;
pub use world::{WorldEvent, WorldSession};
