//! Login directory session: SRP6 authentication followed by the realm list.
//!
//! Each handshake phase registers the handler for the next expected opcode
//! and clears its own, so a replayed or out-of-phase packet finds no handler
//! and is dropped by the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use realmgate_auth::messages::{LogonChallenge, LogonProofResult, RealmListRequest};
use realmgate_auth::{AuthHandshake, RealmInfo, RealmList, SessionKey};
use realmgate_net::{
    Clock, CloseReason, ConnectorConfig, ConnectorEvent, HandlerResult, Opcode, PacketDispatcher,
    TransportConnector, WireMessage,
};

use crate::error::BotError;
use crate::outbox::Outbox;
use crate::state::ConnectionState;

/// Interval between polls while waiting on a phase.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a successful login yields.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: String,
    pub key: SessionKey,
    pub realms: RealmList,
}

/// Pick `name` from `realms`, or the first realm when `name` is empty.
pub fn select_realm<'a>(realms: &'a RealmList, name: &str) -> Result<&'a RealmInfo, BotError> {
    if name.is_empty() {
        return realms.realms.first().ok_or(BotError::NoRealms);
    }
    realms
        .find(name)
        .ok_or_else(|| BotError::UnknownRealm(name.to_string()))
}

// ---------------------------------------------------------------------------
// Handler context
// ---------------------------------------------------------------------------

struct LoginContext {
    dispatcher: Arc<PacketDispatcher<LoginContext>>,
    handshake: AuthHandshake,
    state: ConnectionState,
    outbox: Outbox,
    key: Option<SessionKey>,
    realms: Option<RealmList>,
    failure: Option<BotError>,
}

impl LoginContext {
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
}

fn handle_challenge(ctx: &mut LoginContext, payload: &[u8]) -> HandlerResult {
    ctx.dispatcher.clear_handler(LogonChallenge::OPCODE);
    let challenge = match ctx.decode::<LogonChallenge>(payload) {
        Ok(challenge) => challenge,
        Err(result) => return result,
    };
    let proof = match ctx.handshake.on_challenge(&challenge) {
        Ok(proof) => proof,
        Err(e) => return ctx.fail(e.into()),
    };
    ctx.dispatcher
        .register_handler(LogonProofResult::OPCODE, handle_proof_result);
    if let Err(e) = ctx.outbox.send_message(&proof) {
        return ctx.fail(e);
    }
    ctx.state = ConnectionState::AwaitingProof;
    HandlerResult::Pass
}

fn handle_proof_result(ctx: &mut LoginContext, payload: &[u8]) -> HandlerResult {
    ctx.dispatcher.clear_handler(LogonProofResult::OPCODE);
    let reply = match ctx.decode::<LogonProofResult>(payload) {
        Ok(reply) => reply,
        Err(result) => return result,
    };
    let key = match ctx.handshake.on_proof_result(&reply) {
        Ok(key) => key,
        Err(e) => return ctx.fail(e.into()),
    };

    ctx.outbox.install_cipher(key.as_bytes());
    ctx.dispatcher
        .register_handler(RealmList::OPCODE, handle_realm_list);
    if let Err(e) = ctx.outbox.send_message(&RealmListRequest) {
        return ctx.fail(e);
    }
    ctx.key = Some(key);
    ctx.state = ConnectionState::Authenticated;
    HandlerResult::Pass
}

fn handle_realm_list(ctx: &mut LoginContext, payload: &[u8]) -> HandlerResult {
    ctx.dispatcher.clear_handler(RealmList::OPCODE);
    let list = match ctx.decode::<RealmList>(payload) {
        Ok(list) => list,
        Err(result) => return result,
    };
    tracing::info!(count = list.realms.len(), "Realm list received");
    for realm in &list.realms {
        tracing::debug!(
            name = %realm.name,
            host = %realm.host,
            port = realm.port,
            population = realm.population,
            "Realm"
        );
    }
    ctx.realms = Some(list);
    HandlerResult::Pass
}

// ---------------------------------------------------------------------------
// LoginSession
// ---------------------------------------------------------------------------

/// One connection to the login directory.
///
/// Drive it with [`poll`](Self::poll) from a loop, or await
/// [`run`](Self::run). A transient connection loss restarts the handshake
/// after the reconnect delay; a rejection or protocol violation ends the
/// session with an error.
pub struct LoginSession {
    connector: TransportConnector,
    ctx: LoginContext,
}

impl LoginSession {
    pub fn new(
        identity: &str,
        password: &str,
        config: ConnectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_handshake(AuthHandshake::new(identity, password), config, clock)
    }

    /// Use a preconfigured handshake, e.g. with a fixed private exponent.
    pub fn with_handshake(
        handshake: AuthHandshake,
        config: ConnectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher: Arc<PacketDispatcher<LoginContext>> = Arc::new(PacketDispatcher::new());
        let mut connector = TransportConnector::new(config, clock);
        connector.add_loss_hook(dispatcher.clone());
        Self {
            connector,
            ctx: LoginContext {
                dispatcher,
                handshake,
                state: ConnectionState::Disconnected,
                outbox: Outbox::default(),
                key: None,
                realms: None,
                failure: None,
            },
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state
    }

    pub fn identity(&self) -> &str {
        self.ctx.handshake.identity()
    }

    /// Opcodes with a handler registered right now.
    pub fn expected_opcodes(&self) -> Vec<Opcode> {
        self.ctx.dispatcher.registered_opcodes()
    }

    /// Start connecting to the login directory.
    pub fn connect(&mut self, host: &str, port: u16) {
        self.ctx.state = ConnectionState::Connecting;
        self.connector.connect(host, port);
    }

    /// Drop the connection for good.
    pub fn close(&mut self) {
        self.connector.close(CloseReason::Requested);
        self.ctx.state = ConnectionState::Disconnected;
    }

    /// Process every pending connector event. Returns the outcome once the
    /// realm list has arrived; the directory connection is closed then.
    pub fn poll(&mut self) -> Result<Option<LoginOutcome>, BotError> {
        while let Some(event) = self.connector.poll_event() {
            self.handle_event(event)?;
            if let Some(outcome) = self.take_outcome() {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    /// Poll until the login completes or fails, or `timeout` passes.
    pub async fn run(&mut self, timeout: Duration) -> Result<LoginOutcome, BotError> {
        tokio::time::timeout(timeout, self.run_to_completion())
            .await
            .map_err(|_| BotError::Timeout {
                phase: "login",
                elapsed: timeout,
            })?
    }

    async fn run_to_completion(&mut self) -> Result<LoginOutcome, BotError> {
        loop {
            if let Some(outcome) = self.poll()? {
                return Ok(outcome);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn handle_event(&mut self, event: ConnectorEvent) -> Result<(), BotError> {
        match event {
            ConnectorEvent::Connected => {
                self.ctx.handshake.reset();
                self.ctx.key = None;
                self.ctx.realms = None;
                self.ctx
                    .dispatcher
                    .register_handler(LogonChallenge::OPCODE, handle_challenge);
                let hello = self.ctx.handshake.start()?;
                self.ctx.outbox.send_message(&hello)?;
                self.ctx.state = ConnectionState::AwaitingChallenge;
                self.ctx.outbox.flush(&mut self.connector)
            }
            ConnectorEvent::ConnectFailed { error } => {
                tracing::warn!("Login directory unreachable: {error}");
                self.ctx.state = ConnectionState::Disconnected;
                Ok(())
            }
            ConnectorEvent::Packet { opcode, payload } => {
                let dispatcher = Arc::clone(&self.ctx.dispatcher);
                match dispatcher.dispatch(&mut self.ctx, opcode, &payload) {
                    HandlerResult::Pass => self.ctx.outbox.flush(&mut self.connector),
                    HandlerResult::Disconnect => Err(self.abort(opcode)),
                }
            }
            ConnectorEvent::Lost { reason } => {
                tracing::warn!(state = %self.ctx.state, "Login connection lost: {reason}");
                self.ctx.outbox.clear();
                self.ctx.handshake.reset();
                self.ctx.state = ConnectionState::Lost;
                Ok(())
            }
            ConnectorEvent::Malformed => {
                self.ctx.outbox.clear();
                self.ctx.state = ConnectionState::Lost;
                Ok(())
            }
            ConnectorEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Reconnecting to login directory");
                self.ctx.state = ConnectionState::Connecting;
                Ok(())
            }
            ConnectorEvent::TerminationDue => Err(BotError::Terminated),
        }
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
        tracing::error!(%opcode, ?reason, "Login aborted: {error}");
        self.ctx.outbox.clear();
        self.connector.close(reason);
        self.ctx.state = ConnectionState::Lost;
        error
    }

    fn take_outcome(&mut self) -> Option<LoginOutcome> {
        if self.ctx.key.is_none() || self.ctx.realms.is_none() {
            return None;
        }
        let key = self.ctx.key.take()?;
        let realms = self.ctx.realms.take()?;
        self.connector.close(CloseReason::Requested);
        Some(LoginOutcome {
            identity: self.ctx.handshake.identity().to_string(),
            key,
            realms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmgate_net::ManualClock;

    fn realms() -> RealmList {
        RealmList {
            realms: vec![
                RealmInfo {
                    name: "Stormhold".to_string(),
                    host: "10.0.0.2".to_string(),
                    port: 8085,
                    population: 0.5,
                },
                RealmInfo {
                    name: "Ashenvale".to_string(),
                    host: "10.0.0.3".to_string(),
                    port: 8086,
                    population: 1.5,
                },
            ],
        }
    }

    #[test]
    fn test_select_realm_by_name_or_first() {
        let list = realms();
        assert_eq!(select_realm(&list, "Ashenvale").unwrap().port, 8086);
        assert_eq!(select_realm(&list, "").unwrap().name, "Stormhold");
        assert!(matches!(
            select_realm(&list, "Nowhere"),
            Err(BotError::UnknownRealm(name)) if name == "Nowhere"
        ));
        assert!(matches!(
            select_realm(&RealmList { realms: vec![] }, ""),
            Err(BotError::NoRealms)
        ));
    }

    #[test]
    fn test_new_session_expects_nothing() {
        let session = LoginSession::new(
            "alice",
            "secret",
            ConnectorConfig::default(),
            Arc::new(ManualClock::default()),
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.identity(), "alice");
        assert!(session.expected_opcodes().is_empty());
    }
}
