//! Movement synchronization for the local avatar.
//!
//! The client predicts its own motion and reports it with start, heartbeat
//! and stop packets; the server stays authoritative and corrects the client
//! with forced speed changes and teleports, each acknowledged by ack id.

pub mod messages;
pub mod snapshot;
pub mod synchronizer;

pub use messages::{ForcedSpeedChange, ForcedTeleport, MovementType, OutboundMovement, SpeedAck};
pub use snapshot::{MovementFlags, MovementSnapshot};
pub use synchronizer::{
    MoveRequest, MoveStatus, MovementConfig, MovementError, MovementSynchronizer, PositionSink,
};
