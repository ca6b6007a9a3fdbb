//! Realm session: join with the login session key, then keep the avatar's
//! movement and the view of nearby entities in sync with the realm.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use glam::Vec3;
use realmgate_auth::messages::{AuthChallenge, AuthResponse};
use realmgate_auth::{JoinClient, SessionKey};
use realmgate_awareness::{
    AreaWatch, AwarenessEvent, EntityEvent, EntityRegistry, Guid, HostilityPolicy, ObjectDespawn,
    ObjectSpawn, ObjectUpdate, RemoteEntity,
};
use realmgate_movement::{
    ForcedSpeedChange, ForcedTeleport, MoveRequest, MoveStatus, MovementConfig, MovementSynchronizer,
    MovementType, PositionSink,
};
use realmgate_net::{
    Clock, CloseReason, ConnectorEvent, HandlerResult, Opcode, PacketDispatcher,
    TransportConnector, WireMessage,
};

use crate::error::BotError;
use crate::login::POLL_INTERVAL;
use crate::messages::EnterWorld;
use crate::outbox::Outbox;
use crate::settings::SessionSettings;
use crate::state::ConnectionState;

/// Something the owner of a [`WorldSession`] may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// The realm accepted the session key.
    Joined,
    /// The avatar was placed in the world.
    EnteredWorld { guid: Guid, position: Vec3 },
    /// Registry change from the realm's object stream.
    Entity(EntityEvent),
    /// The server forced a new speed.
    SpeedForced {
        movement_type: MovementType,
        speed: f32,
    },
    /// The server moved the avatar.
    Teleported { position: Vec3 },
    /// The realm connection dropped; a reconnect is scheduled.
    Lost { reason: String },
    /// A reconnect attempt started.
    Reconnecting { attempt: u32 },
}

// ---------------------------------------------------------------------------
// Position sink sharing
// ---------------------------------------------------------------------------

type SharedSink = Arc<Mutex<Box<dyn PositionSink>>>;

/// Forwards to a sink that outlives any single synchronizer.
struct SinkHandle(SharedSink);

impl PositionSink for SinkHandle {
    fn on_position_changed(&mut self, position: Vec3, facing: f32) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_position_changed(position, facing);
    }
}

// ---------------------------------------------------------------------------
// Handler context
// ---------------------------------------------------------------------------

struct WorldContext {
    dispatcher: Arc<PacketDispatcher<WorldContext>>,
    clock: Arc<dyn Clock>,
    join: JoinClient,
    state: ConnectionState,
    outbox: Outbox,
    movement_config: MovementConfig,
    movement: Option<MovementSynchronizer>,
    sink: Option<SharedSink>,
    self_guid: Option<Guid>,
    registry: EntityRegistry,
    events: VecDeque<WorldEvent>,
    failure: Option<BotError>,
}

impl WorldContext {
    fn fail(&mut self, error: BotError) -> HandlerResult {
        self.failure = Some(error);
        HandlerResult::Disconnect
    }

    fn decode<M: WireMessage>(&mut self, payload: &[u8]) -> Result<M, HandlerResult> {
        M::from_payload(payload).map_err(|source| {
            self.fail(BotError::Packet {
                opcode: M::OPCODE,
                source,
            })
        })
    }

    /// Move queued movement packets into the transport outbox.
    fn collect_movement(&mut self) {
        let Some(movement) = self.movement.as_mut() else {
            return;
        };
        for packet in movement.drain_outbox() {
            self.outbox.send_raw(packet.opcode(), packet.to_payload());
        }
    }

    /// Forget everything tied to the current connection.
    fn reset_world(&mut self) {
        self.outbox.clear();
        self.join.reset();
        self.movement = None;
        self.self_guid = None;
        self.registry.clear();
        self.registry.drain_events();
    }
}

fn handle_auth_challenge(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    ctx.dispatcher.clear_handler(AuthChallenge::OPCODE);
    let challenge = match ctx.decode::<AuthChallenge>(payload) {
        Ok(challenge) => challenge,
        Err(result) => return result,
    };
    let session = match ctx.join.on_challenge(&challenge) {
        Ok(session) => session,
        Err(e) => return ctx.fail(e.into()),
    };
    ctx.dispatcher
        .register_handler(AuthResponse::OPCODE, handle_auth_response);
    if let Err(e) = ctx.outbox.send_message(&session) {
        return ctx.fail(e);
    }
    ctx.state = ConnectionState::AwaitingProof;
    HandlerResult::Pass
}

fn handle_auth_response(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    ctx.dispatcher.clear_handler(AuthResponse::OPCODE);
    let response = match ctx.decode::<AuthResponse>(payload) {
        Ok(response) => response,
        Err(result) => return result,
    };
    let key = match ctx.join.on_response(&response) {
        Ok(key) => key,
        Err(e) => return ctx.fail(e.into()),
    };
    ctx.outbox.install_cipher(&key);

    let dispatcher = &ctx.dispatcher;
    dispatcher.register_handler(EnterWorld::OPCODE, handle_enter_world);
    dispatcher.register_handler(ForcedSpeedChange::OPCODE, handle_forced_speed_change);
    dispatcher.register_handler(ForcedTeleport::OPCODE, handle_forced_teleport);
    dispatcher.register_handler(ObjectSpawn::OPCODE, handle_object_spawn);
    dispatcher.register_handler(ObjectUpdate::OPCODE, handle_object_update);
    dispatcher.register_handler(ObjectDespawn::OPCODE, handle_object_despawn);

    ctx.state = ConnectionState::Joined;
    ctx.events.push_back(WorldEvent::Joined);
    HandlerResult::Pass
}

fn handle_enter_world(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    let entry = match ctx.decode::<EnterWorld>(payload) {
        Ok(entry) => entry,
        Err(result) => return result,
    };
    let mut movement = match MovementSynchronizer::new(
        ctx.movement_config.clone(),
        Arc::clone(&ctx.clock),
        entry.snapshot,
    ) {
        Ok(movement) => movement,
        Err(e) => return ctx.fail(e.into()),
    };
    if let Some(sink) = &ctx.sink {
        movement.set_position_sink(Box::new(SinkHandle(Arc::clone(sink))));
    }
    tracing::info!(guid = %entry.guid, position = ?entry.snapshot.position, "Entered world");
    ctx.movement = Some(movement);
    ctx.self_guid = Some(entry.guid);
    ctx.events.push_back(WorldEvent::EnteredWorld {
        guid: entry.guid,
        position: entry.snapshot.position,
    });
    HandlerResult::Pass
}

fn handle_forced_speed_change(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    let change = match ctx.decode::<ForcedSpeedChange>(payload) {
        Ok(change) => change,
        Err(result) => return result,
    };
    let Some(movement) = ctx.movement.as_mut() else {
        tracing::warn!(ack_id = change.ack_id, "Speed change before world entry, ignored");
        return HandlerResult::Pass;
    };
    movement.on_forced_speed_change(change.ack_id, change.movement_type, change.speed);
    ctx.events.push_back(WorldEvent::SpeedForced {
        movement_type: change.movement_type,
        speed: change.speed,
    });
    HandlerResult::Pass
}

fn handle_forced_teleport(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    let teleport = match ctx.decode::<ForcedTeleport>(payload) {
        Ok(teleport) => teleport,
        Err(result) => return result,
    };
    let Some(movement) = ctx.movement.as_mut() else {
        tracing::warn!(ack_id = teleport.ack_id, "Teleport before world entry, ignored");
        return HandlerResult::Pass;
    };
    movement.on_forced_teleport(teleport.ack_id, teleport.snapshot);
    ctx.events.push_back(WorldEvent::Teleported {
        position: teleport.snapshot.position,
    });
    HandlerResult::Pass
}

fn handle_object_spawn(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    match ctx.decode::<ObjectSpawn>(payload) {
        Ok(spawn) => {
            ctx.registry.spawn(RemoteEntity::from(&spawn));
            HandlerResult::Pass
        }
        Err(result) => result,
    }
}

fn handle_object_update(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    match ctx.decode::<ObjectUpdate>(payload) {
        Ok(update) => {
            ctx.registry.update(&update);
            HandlerResult::Pass
        }
        Err(result) => result,
    }
}

fn handle_object_despawn(ctx: &mut WorldContext, payload: &[u8]) -> HandlerResult {
    match ctx.decode::<ObjectDespawn>(payload) {
        Ok(despawn) => {
            ctx.registry.despawn(despawn.guid);
            HandlerResult::Pass
        }
        Err(result) => result,
    }
}

// ---------------------------------------------------------------------------
// WorldSession
// ---------------------------------------------------------------------------

/// One connection to a realm server.
///
/// The realm is joined with the key from a finished
/// [`LoginSession`](crate::LoginSession); no password is involved. A dropped
/// connection clears all per-connection state (entities, avatar, movement)
/// and the join restarts from scratch after the reconnect delay.
pub struct WorldSession {
    connector: TransportConnector,
    ctx: WorldContext,
    watch: AreaWatch,
    exclude_self: bool,
    hostility: Box<dyn HostilityPolicy>,
}

impl WorldSession {
    pub fn new(
        identity: &str,
        key: SessionKey,
        settings: &SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_join_client(JoinClient::new(identity, key), settings, clock)
    }

    /// Use a preconfigured join client, e.g. with a fixed client seed.
    pub fn with_join_client(
        join: JoinClient,
        settings: &SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher: Arc<PacketDispatcher<WorldContext>> = Arc::new(PacketDispatcher::new());
        let mut connector = TransportConnector::new(settings.connector.clone(), Arc::clone(&clock));
        connector.add_loss_hook(dispatcher.clone());
        let registry = EntityRegistry::new();
        let watch = AreaWatch::new(Vec3::ZERO, settings.awareness_radius, &registry);
        Self {
            connector,
            ctx: WorldContext {
                dispatcher,
                clock,
                join,
                state: ConnectionState::Disconnected,
                outbox: Outbox::default(),
                movement_config: settings.movement.clone(),
                movement: None,
                sink: None,
                self_guid: None,
                registry,
                events: VecDeque::new(),
                failure: None,
            },
            watch,
            exclude_self: settings.exclude_self,
            hostility: Box::new(settings.hostility.clone()),
        }
    }

    /// Replace the attackable classification.
    pub fn set_hostility_policy(&mut self, policy: Box<dyn HostilityPolicy>) {
        self.hostility = policy;
    }

    /// Receive every avatar position change, across reconnects.
    pub fn set_position_sink(&mut self, sink: Box<dyn PositionSink>) {
        let shared: SharedSink = Arc::new(Mutex::new(sink));
        if let Some(movement) = self.ctx.movement.as_mut() {
            movement.set_position_sink(Box::new(SinkHandle(Arc::clone(&shared))));
        }
        self.ctx.sink = Some(shared);
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state
    }

    /// Whether the avatar has been placed in the world.
    pub fn in_world(&self) -> bool {
        self.ctx.movement.is_some()
    }

    pub fn self_guid(&self) -> Option<Guid> {
        self.ctx.self_guid
    }

    pub fn position(&self) -> Option<Vec3> {
        self.ctx.movement.as_ref().map(MovementSynchronizer::position)
    }

    pub fn forced_speed(&self, movement_type: MovementType) -> Option<f32> {
        self.ctx
            .movement
            .as_ref()
            .and_then(|movement| movement.forced_speed(movement_type))
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.ctx.registry
    }

    pub fn watch(&self) -> &AreaWatch {
        &self.watch
    }

    /// Opcodes with a handler registered right now.
    pub fn expected_opcodes(&self) -> Vec<Opcode> {
        self.ctx.dispatcher.registered_opcodes()
    }

    /// Start connecting to the realm.
    pub fn connect(&mut self, host: &str, port: u16) {
        self.ctx.state = ConnectionState::Connecting;
        self.connector.connect(host, port);
    }

    /// Stop moving and drop the connection for good.
    pub fn close(&mut self) {
        if let Some(movement) = self.ctx.movement.as_mut() {
            movement.abort();
        }
        self.ctx.collect_movement();
        if let Err(e) = self.ctx.outbox.flush(&mut self.connector) {
            tracing::debug!("Final stop not sent: {e}");
        }
        self.connector.close(CloseReason::Requested);
        self.ctx.reset_world();
        self.watch.rescan(&self.ctx.registry);
        self.ctx.state = ConnectionState::Disconnected;
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.ctx.events.drain(..).collect()
    }

    /// Process every pending connector event.
    pub fn poll(&mut self) -> Result<(), BotError> {
        while let Some(event) = self.connector.poll_event() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Poll until the avatar is in the world, or `timeout` passes.
    pub async fn wait_until_in_world(&mut self, timeout: Duration) -> Result<(), BotError> {
        tokio::time::timeout(timeout, self.poll_until_in_world())
            .await
            .map_err(|_| BotError::Timeout {
                phase: "world entry",
                elapsed: timeout,
            })?
    }

    async fn poll_until_in_world(&mut self) -> Result<(), BotError> {
        loop {
            self.poll()?;
            if self.in_world() {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Drive one tick of movement towards `request.target` and send what it
    /// produced.
    pub fn move_towards(&mut self, request: &MoveRequest) -> Result<MoveStatus, BotError> {
        let movement = self.ctx.movement.as_mut().ok_or(BotError::NotInWorld)?;
        let status = movement.move_towards(request);
        self.flush_movement()?;
        Ok(status)
    }

    /// Stop the current movement, if any.
    pub fn abort_movement(&mut self) -> Result<(), BotError> {
        let movement = self.ctx.movement.as_mut().ok_or(BotError::NotInWorld)?;
        movement.abort();
        self.flush_movement()
    }

    /// Recenter the area watch on the avatar and report what came into or
    /// left view.
    pub fn update_awareness(&mut self) -> Vec<AwarenessEvent> {
        if let Some(position) = self.position() {
            self.watch.set_center(position);
        }
        let self_guid = if self.exclude_self {
            self.ctx.self_guid
        } else {
            None
        };
        self.watch.set_self_guid(self_guid);
        self.watch.update(&self.ctx.registry)
    }

    /// Change the watch radius without reporting spurious transitions.
    pub fn set_awareness_radius(&mut self, radius: f32) {
        let center = self.position().unwrap_or(self.watch.center());
        self.watch.reconfigure(center, radius, &self.ctx.registry);
    }

    /// Whether the entity is known and attackable under the current policy.
    pub fn is_attackable(&self, guid: Guid) -> bool {
        self.ctx
            .registry
            .get(guid)
            .is_some_and(|entity| self.hostility.is_attackable(entity))
    }

    /// Watched entities that are attackable, ordered by guid.
    pub fn attackable_in_view(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self
            .watch
            .watched()
            .iter()
            .copied()
            .filter(|guid| self.is_attackable(*guid))
            .collect();
        guids.sort_unstable();
        guids
    }

    fn flush_movement(&mut self) -> Result<(), BotError> {
        self.ctx.collect_movement();
        self.ctx.outbox.flush(&mut self.connector)
    }

    fn collect_entity_events(&mut self) {
        let events = self.ctx.registry.drain_events();
        self.ctx
            .events
            .extend(events.into_iter().map(WorldEvent::Entity));
    }

    fn handle_event(&mut self, event: ConnectorEvent) -> Result<(), BotError> {
        match event {
            ConnectorEvent::Connected => {
                self.ctx
                    .dispatcher
                    .register_handler(AuthChallenge::OPCODE, handle_auth_challenge);
                self.ctx.state = ConnectionState::AwaitingChallenge;
                tracing::debug!("Realm connected, awaiting challenge");
                Ok(())
            }
            ConnectorEvent::ConnectFailed { error } => {
                tracing::warn!("Realm unreachable: {error}");
                self.ctx.state = ConnectionState::Disconnected;
                Ok(())
            }
            ConnectorEvent::Packet { opcode, payload } => {
                let dispatcher = Arc::clone(&self.ctx.dispatcher);
                let result = dispatcher.dispatch(&mut self.ctx, opcode, &payload);
                self.collect_entity_events();
                match result {
                    HandlerResult::Pass => self.flush_movement(),
                    HandlerResult::Disconnect => Err(self.abort(opcode)),
                }
            }
            ConnectorEvent::Lost { reason } => {
                tracing::warn!(state = %self.ctx.state, "Realm connection lost: {reason}");
                self.drop_world();
                self.ctx.events.push_back(WorldEvent::Lost { reason });
                Ok(())
            }
            ConnectorEvent::Malformed => {
                self.drop_world();
                Ok(())
            }
            ConnectorEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Reconnecting to realm");
                self.ctx.state = ConnectionState::Connecting;
                self.ctx.events.push_back(WorldEvent::Reconnecting { attempt });
                Ok(())
            }
            ConnectorEvent::TerminationDue => Err(BotError::Terminated),
        }
    }

    fn drop_world(&mut self) {
        self.ctx.reset_world();
        self.watch.rescan(&self.ctx.registry);
        self.ctx.state = ConnectionState::Lost;
    }

    fn abort(&mut self, opcode: Opcode) -> BotError {
        let error = self
            .ctx
            .failure
            .take()
            .unwrap_or(BotError::HandlerDisconnect(opcode));
        let reason = if error.is_rejection() {
            CloseReason::Rejected
        } else {
            CloseReason::ProtocolViolation
        };
        tracing::error!(%opcode, ?reason, "Realm session aborted: {error}");
        self.connector.close(reason);
        self.drop_world();
        error
    }
}
