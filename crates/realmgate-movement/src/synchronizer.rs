//! Client-side movement prediction and server correction handling.
//!
//! The [`MovementSynchronizer`] owns the local avatar's [`MovementSnapshot`].
//! It predicts motion towards a target, reporting progress to the server with
//! start/heartbeat/stop packets, and applies server corrections (forced speed
//! changes, teleports) immediately, acknowledging each with its ack id.
//!
//! Nothing here touches the network: packets are queued in an outbox that
//! the owning session drains after every tick.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use realmgate_net::Clock;

use crate::messages::{MovementType, OutboundMovement, SpeedAck};
use crate::snapshot::{MovementFlags, MovementSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Shortest heartbeat interval accepted.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
/// Longest heartbeat interval accepted.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Errors raised when configuring the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MovementError {
    /// Heartbeat interval outside 100–500 ms.
    #[error("heartbeat interval {0:?} outside 100..=500 ms")]
    InvalidHeartbeatInterval(Duration),
}

/// Synchronizer tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementConfig {
    /// Time between heartbeats while moving. Default: 250 ms.
    pub heartbeat_interval: Duration,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(250),
        }
    }
}

impl MovementConfig {
    pub fn validate(&self) -> Result<(), MovementError> {
        if (MIN_HEARTBEAT_INTERVAL..=MAX_HEARTBEAT_INTERVAL).contains(&self.heartbeat_interval) {
            Ok(())
        } else {
            Err(MovementError::InvalidHeartbeatInterval(
                self.heartbeat_interval,
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Receives every locally predicted or server-forced position change.
pub trait PositionSink: Send {
    fn on_position_changed(&mut self, position: Vec3, facing: f32);
}

/// Where to go and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub target: Vec3,
    /// Arrival is declared within this distance of `target`.
    pub acceptance_radius: f32,
    /// Units per second, unless the server has forced a run speed.
    pub speed: f32,
    pub timeout: Duration,
}

/// Outcome of one [`MovementSynchronizer::move_towards`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct ActiveMove {
    target: Vec3,
    started_at: u64,
    last_heartbeat: u64,
}

// ---------------------------------------------------------------------------
// MovementSynchronizer
// ---------------------------------------------------------------------------

/// Single writer of the local avatar's movement state.
pub struct MovementSynchronizer {
    clock: Arc<dyn Clock>,
    config: MovementConfig,
    snapshot: MovementSnapshot,
    last_timestamp: u32,
    active: Option<ActiveMove>,
    forced_speeds: HashMap<MovementType, f32>,
    outbox: VecDeque<OutboundMovement>,
    sink: Option<Box<dyn PositionSink>>,
}

impl MovementSynchronizer {
    /// Start from `snapshot`.
    pub fn new(
        config: MovementConfig,
        clock: Arc<dyn Clock>,
        snapshot: MovementSnapshot,
    ) -> Result<Self, MovementError> {
        config.validate()?;
        Ok(Self {
            clock,
            config,
            last_timestamp: snapshot.timestamp,
            snapshot,
            active: None,
            forced_speeds: HashMap::new(),
            outbox: VecDeque::new(),
            sink: None,
        })
    }

    pub fn set_position_sink(&mut self, sink: Box<dyn PositionSink>) {
        self.sink = Some(sink);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &MovementSnapshot {
        &self.snapshot
    }

    pub fn position(&self) -> Vec3 {
        self.snapshot.position
    }

    pub fn is_moving(&self) -> bool {
        self.snapshot.is_moving()
    }

    /// Speed last forced by the server for `movement_type`.
    pub fn forced_speed(&self, movement_type: MovementType) -> Option<f32> {
        self.forced_speeds.get(&movement_type).copied()
    }

    /// Take every queued packet, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<OutboundMovement> {
        self.outbox.drain(..).collect()
    }

    /// Stamp the snapshot with the current movement time. Never steps back.
    fn stamp(&mut self) -> u32 {
        // Wire timestamps are 32-bit. Compare in serial order so the stamp
        // follows the clock through the wrap instead of freezing.
        let now = self.clock.now_millis() as u32;
        if now.wrapping_sub(self.last_timestamp) as i32 > 0 {
            self.last_timestamp = now;
        }
        self.snapshot.timestamp = self.last_timestamp;
        self.last_timestamp
    }

    fn notify(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_position_changed(self.snapshot.position, self.snapshot.facing);
        }
    }

    fn emit(&mut self, make: fn(MovementSnapshot) -> OutboundMovement) {
        self.stamp();
        let packet = make(self.snapshot);
        tracing::trace!(opcode = %packet.opcode(), "Queued movement packet");
        self.outbox.push_back(packet);
    }

    fn stop(&mut self) {
        self.snapshot.flags.remove(MovementFlags::MOVING);
        self.emit(OutboundMovement::Stop);
    }

    /// Drive one tick of movement towards `request.target`.
    ///
    /// A new target (or the first call) starts the timeout. Call once per
    /// tick until the result is no longer [`MoveStatus::InProgress`].
    pub fn move_towards(&mut self, request: &MoveRequest) -> MoveStatus {
        let now = self.clock.now_millis();
        let active = match self.active {
            Some(active) if active.target == request.target => active,
            _ => {
                tracing::debug!(target = ?request.target, "New movement target");
                let active = ActiveMove {
                    target: request.target,
                    started_at: now,
                    last_heartbeat: now,
                };
                self.active = Some(active);
                active
            }
        };

        if self.snapshot.is_airborne() {
            self.snapshot.flags.remove(MovementFlags::AIRBORNE);
            self.snapshot.fall_time = 0;
            self.emit(OutboundMovement::FallLanded);
            return MoveStatus::InProgress;
        }

        let timeout = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        if now.saturating_sub(active.started_at) >= timeout {
            tracing::warn!(target = ?request.target, "Movement timed out");
            if self.is_moving() {
                self.stop();
            }
            self.active = None;
            return MoveStatus::Failed;
        }

        let offset = request.target - self.snapshot.position;
        let distance = offset.length();
        if distance <= request.acceptance_radius {
            if self.is_moving() {
                self.stop();
            }
            self.active = None;
            tracing::debug!(target = ?request.target, "Arrived");
            return MoveStatus::Succeeded;
        }

        let facing = offset.y.atan2(offset.x);
        if !self.is_moving() {
            self.snapshot.flags.insert(MovementFlags::FORWARD);
            self.snapshot.facing = facing;
            self.emit(OutboundMovement::StartForward);
            self.active = Some(ActiveMove {
                last_heartbeat: now,
                ..active
            });
            self.notify();
            return MoveStatus::InProgress;
        }

        let elapsed = now.saturating_sub(active.last_heartbeat);
        let interval = u64::try_from(self.config.heartbeat_interval.as_millis()).unwrap_or(250);
        if elapsed >= interval {
            let speed = self
                .forced_speed(MovementType::Run)
                .unwrap_or(request.speed);
            let step = (speed * elapsed as f32 / 1000.0).min(distance);
            self.snapshot.position += offset / distance * step;
            self.snapshot.facing = facing;
            self.emit(OutboundMovement::Heartbeat);
            self.active = Some(ActiveMove {
                last_heartbeat: now,
                ..active
            });
            self.notify();
        }
        MoveStatus::InProgress
    }

    /// Abandon the current movement. Emits a stop only if moving.
    pub fn abort(&mut self) {
        self.active = None;
        if self.is_moving() {
            tracing::debug!("Movement aborted");
            self.stop();
        }
    }

    /// Server forced a new speed: record it and queue the ack.
    pub fn on_forced_speed_change(&mut self, ack_id: u32, movement_type: MovementType, speed: f32) {
        tracing::debug!(ack_id, ?movement_type, speed, "Forced speed change");
        self.forced_speeds.insert(movement_type, speed);
        self.stamp();
        self.outbox.push_back(OutboundMovement::SpeedAck(SpeedAck {
            ack_id,
            movement_type,
            snapshot: self.snapshot,
            speed,
        }));
    }

    /// Server forced a position: adopt `snapshot` wholesale and queue the ack.
    pub fn on_forced_teleport(&mut self, ack_id: u32, snapshot: MovementSnapshot) {
        tracing::info!(ack_id, position = ?snapshot.position, "Forced teleport");
        self.snapshot = snapshot;
        self.stamp();
        if let Some(active) = self.active.as_mut() {
            active.last_heartbeat = self.clock.now_millis();
        }
        self.outbox.push_back(OutboundMovement::TeleportAck {
            ack_id,
            snapshot: self.snapshot,
        });
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmgate_net::ManualClock;
    use std::sync::Mutex;

    fn synchronizer(clock: &ManualClock, start: MovementSnapshot) -> MovementSynchronizer {
        MovementSynchronizer::new(MovementConfig::default(), Arc::new(clock.clone()), start)
            .unwrap()
    }

    fn request(target: Vec3) -> MoveRequest {
        MoveRequest {
            target,
            acceptance_radius: 1.0,
            speed: 7.0,
            timeout: Duration::from_secs(30),
        }
    }

    fn heartbeats(packets: &[OutboundMovement]) -> usize {
        packets
            .iter()
            .filter(|p| matches!(p, OutboundMovement::Heartbeat(_)))
            .count()
    }

    #[test]
    fn test_walk_to_target_emits_expected_packets() {
        let clock = ManualClock::starting_at(1_000);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(10.0, 0.0, 0.0));

        let mut ticks = 0;
        while sync.move_towards(&req) == MoveStatus::InProgress {
            clock.advance(250);
            ticks += 1;
            assert!(ticks < 100, "movement never finished");
        }

        let packets = sync.drain_outbox();
        assert!(matches!(packets.first(), Some(OutboundMovement::StartForward(_))));
        assert!(matches!(packets.last(), Some(OutboundMovement::Stop(_))));
        assert_eq!(heartbeats(&packets), 6);
        assert!(!sync.is_moving());
        assert!(sync.position().distance(req.target) <= 1.0);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let clock = ManualClock::starting_at(5_000);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(0.0, 20.0, 0.0));

        for _ in 0..10 {
            sync.move_towards(&req);
            clock.advance(300);
        }
        // A teleport stamped in the past must not pull time backwards.
        sync.on_forced_teleport(
            1,
            MovementSnapshot {
                timestamp: 10,
                ..MovementSnapshot::at(Vec3::new(0.0, 5.0, 0.0))
            },
        );
        sync.move_towards(&req);

        let stamps: Vec<u32> = sync
            .drain_outbox()
            .iter()
            .map(|p| p.snapshot().timestamp)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
    }

    #[test]
    fn test_timestamps_follow_the_32_bit_wrap() {
        let clock = ManualClock::starting_at(u64::from(u32::MAX) - 99);
        let start = MovementSnapshot {
            timestamp: u32::MAX - 200,
            ..MovementSnapshot::at(Vec3::ZERO)
        };
        let mut sync = synchronizer(&clock, start);
        let req = request(Vec3::new(50.0, 0.0, 0.0));

        sync.move_towards(&req);
        clock.advance(250);
        sync.move_towards(&req);
        clock.advance(250);
        sync.move_towards(&req);

        let stamps: Vec<u32> = sync
            .drain_outbox()
            .iter()
            .map(|p| p.snapshot().timestamp)
            .collect();
        assert_eq!(stamps, vec![u32::MAX - 99, 150, 400]);
    }

    #[test]
    fn test_heartbeat_waits_for_interval() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(50.0, 0.0, 0.0));

        sync.move_towards(&req);
        clock.advance(100);
        sync.move_towards(&req);
        clock.advance(100);
        sync.move_towards(&req);
        assert_eq!(heartbeats(&sync.drain_outbox()), 0);

        clock.advance(50);
        sync.move_towards(&req);
        let packets = sync.drain_outbox();
        assert_eq!(heartbeats(&packets), 1);
        // 250 ms at 7 units/s.
        assert!((sync.position().x - 1.75).abs() < 1e-4);
    }

    #[test]
    fn test_heartbeat_never_changes_flags() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(50.0, 0.0, 0.0));
        for _ in 0..5 {
            sync.move_towards(&req);
            clock.advance(250);
        }
        let packets = sync.drain_outbox();
        for packet in &packets {
            if let OutboundMovement::Heartbeat(snapshot) = packet {
                assert_eq!(snapshot.flags, MovementFlags::FORWARD);
            }
        }
    }

    #[test]
    fn test_residual_falling_lands_first() {
        let clock = ManualClock::starting_at(0);
        let start = MovementSnapshot {
            flags: MovementFlags::FALLING,
            fall_time: 800,
            ..MovementSnapshot::at(Vec3::ZERO)
        };
        let mut sync = synchronizer(&clock, start);
        let req = request(Vec3::new(5.0, 0.0, 0.0));

        assert_eq!(sync.move_towards(&req), MoveStatus::InProgress);
        let packets = sync.drain_outbox();
        assert_eq!(packets.len(), 1);
        match packets[0] {
            OutboundMovement::FallLanded(snapshot) => {
                assert!(!snapshot.is_airborne());
                assert_eq!(snapshot.position, Vec3::ZERO);
            }
            other => panic!("expected fall land, got {other:?}"),
        }

        sync.move_towards(&req);
        assert!(matches!(
            sync.drain_outbox().as_slice(),
            [OutboundMovement::StartForward(_)]
        ));
    }

    #[test]
    fn test_already_at_target_succeeds_without_packets() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::new(3.0, 3.0, 0.0)));
        assert_eq!(
            sync.move_towards(&request(Vec3::new(3.5, 3.0, 0.0))),
            MoveStatus::Succeeded
        );
        assert!(sync.drain_outbox().is_empty());
    }

    #[test]
    fn test_timeout_stops_and_fails() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = MoveRequest {
            timeout: Duration::from_secs(1),
            ..request(Vec3::new(100.0, 0.0, 0.0))
        };

        sync.move_towards(&req);
        clock.advance(1_000);
        assert_eq!(sync.move_towards(&req), MoveStatus::Failed);
        assert!(matches!(
            sync.drain_outbox().last(),
            Some(OutboundMovement::Stop(_))
        ));
        assert!(!sync.is_moving());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        sync.move_towards(&request(Vec3::new(10.0, 0.0, 0.0)));
        sync.drain_outbox();

        sync.abort();
        sync.abort();
        assert!(matches!(
            sync.drain_outbox().as_slice(),
            [OutboundMovement::Stop(_)]
        ));
    }

    #[test]
    fn test_forced_speed_change_is_acknowledged_and_applied() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(100.0, 0.0, 0.0));
        sync.move_towards(&req);
        let before = *sync.snapshot();

        sync.on_forced_speed_change(77, MovementType::Run, 14.0);
        let packets = sync.drain_outbox();
        match packets.last() {
            Some(OutboundMovement::SpeedAck(ack)) => {
                assert_eq!(ack.ack_id, 77);
                assert_eq!(ack.speed, 14.0);
                assert_eq!(ack.snapshot.position, before.position);
                assert_eq!(ack.snapshot.flags, before.flags);
            }
            other => panic!("expected speed ack, got {other:?}"),
        }

        clock.advance(250);
        sync.move_towards(&req);
        // 250 ms at the forced 14 units/s.
        assert!((sync.position().x - 3.5).abs() < 1e-4);
    }

    #[test]
    fn test_teleport_replaces_state_and_prediction_resumes() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(100.0, 0.0, 0.0));
        sync.move_towards(&req);
        clock.advance(250);
        sync.move_towards(&req);
        sync.drain_outbox();

        let forced = MovementSnapshot::at(Vec3::new(50.0, 0.0, 0.0));
        sync.on_forced_teleport(9, forced);
        assert_eq!(sync.position(), forced.position);
        assert!(matches!(
            sync.drain_outbox().as_slice(),
            [OutboundMovement::TeleportAck { ack_id: 9, .. }]
        ));

        // The teleport snapshot is at rest, so prediction restarts from it.
        sync.move_towards(&req);
        let packets = sync.drain_outbox();
        match packets.as_slice() {
            [OutboundMovement::StartForward(snapshot)] => {
                assert_eq!(snapshot.position, forced.position);
            }
            other => panic!("expected restart, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_after_teleport_faces_from_new_position() {
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        let req = request(Vec3::new(100.0, 0.0, 0.0));
        sync.move_towards(&req);
        clock.advance(250);
        sync.move_towards(&req);
        assert_eq!(sync.snapshot().facing, 0.0);
        sync.drain_outbox();

        // Still running forward, but now south-west of the target.
        let forced = MovementSnapshot {
            flags: MovementFlags::FORWARD,
            ..MovementSnapshot::at(Vec3::new(50.0, -50.0, 0.0))
        };
        sync.on_forced_teleport(4, forced);
        sync.drain_outbox();

        clock.advance(250);
        sync.move_towards(&req);
        let packets = sync.drain_outbox();
        match packets.as_slice() {
            [OutboundMovement::Heartbeat(snapshot)] => {
                assert!((snapshot.facing - std::f32::consts::FRAC_PI_4).abs() < 1e-5);
                let step = Vec3::new(1.0, 1.0, 0.0).normalize() * 1.75;
                assert!(snapshot.position.distance(forced.position + step) < 1e-4);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn test_position_sink_sees_every_change() {
        struct Recorder(Arc<Mutex<Vec<Vec3>>>);
        impl PositionSink for Recorder {
            fn on_position_changed(&mut self, position: Vec3, _facing: f32) {
                self.0.lock().unwrap().push(position);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let clock = ManualClock::starting_at(0);
        let mut sync = synchronizer(&clock, MovementSnapshot::at(Vec3::ZERO));
        sync.set_position_sink(Box::new(Recorder(Arc::clone(&seen))));

        let req = request(Vec3::new(10.0, 0.0, 0.0));
        sync.move_towards(&req);
        clock.advance(250);
        sync.move_towards(&req);
        sync.on_forced_teleport(1, MovementSnapshot::at(Vec3::new(0.0, 9.0, 0.0)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], Vec3::new(0.0, 9.0, 0.0));
    }

    #[test]
    fn test_heartbeat_interval_bounds() {
        let clock = ManualClock::default();
        let config = MovementConfig {
            heartbeat_interval: Duration::from_millis(50),
        };
        assert!(matches!(
            MovementSynchronizer::new(config, Arc::new(clock), MovementSnapshot::default()),
            Err(MovementError::InvalidHeartbeatInterval(_))
        ));
    }
}
