//! Outbound connection lifecycle.
//!
//! [`TransportConnector`] owns one TCP stream to a login directory or realm
//! server. Socket I/O runs on Tokio tasks that only move raw frame bodies
//! through channels. Decryption, state transitions and timer
//! expiry happen synchronously inside [`TransportConnector::poll_event`],
//! called from the owning session's tick.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Connected ──drop──▶ Lost
//!        ▲                      │                                │
//!        └──── reconnect timer ─┴────────────────────────────────┘
//! close() / malformed frame ──▶ Closed (no reconnect)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};

use crate::cipher::{CipherError, CipherRole, SessionCipher};
use crate::clock::Clock;
use crate::framing::{self, FrameConfig, FrameError};
use crate::packet::{Opcode, PacketError, WireMessage};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Something that must be reset when the connection drops.
///
/// Implemented by the packet dispatcher (stale handlers are cleared) and by
/// pending-request tables (outstanding requests are failed).
pub trait ConnectionLossHook: Send + Sync {
    /// Called once per lost, failed or closed connection.
    fn on_connection_lost(&self);
}

/// Connector timing and framing configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Delay before reconnecting after a transient failure. Default: 5 s.
    pub reconnect_delay: Duration,
    /// Delay between a malformed packet and [`ConnectorEvent::TerminationDue`].
    /// Default: 3 s.
    pub termination_grace: Duration,
    /// Frame size limits.
    pub frame: FrameConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            termination_grace: Duration::from_secs(3),
            frame: FrameConfig::default(),
        }
    }
}

/// Socket-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No socket and no connection attempt in flight.
    Disconnected,
    /// TCP connect in flight.
    Connecting,
    /// Stream established.
    Connected,
    /// Stream dropped; a reconnect may be scheduled.
    Lost,
    /// Closed for good; no reconnect will be attempted.
    Closed,
}

/// Why the owner closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal shutdown.
    Requested,
    /// The peer violated the protocol (bad proof, downgrade, bad content).
    ProtocolViolation,
    /// The server rejected the session with a typed result code.
    Rejected,
}

/// Something the owning session must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// The stream is up; the session should start its handshake.
    Connected,
    /// The connect attempt failed; a reconnect has been scheduled.
    ConnectFailed {
        /// Human-readable cause.
        error: String,
    },
    /// A decrypted packet.
    Packet {
        /// Packet opcode.
        opcode: Opcode,
        /// Packet payload.
        payload: Vec<u8>,
    },
    /// The stream dropped.
    Lost {
        /// Human-readable cause.
        reason: String,
    },
    /// A frame could not be parsed; termination has been scheduled.
    Malformed,
    /// The reconnect timer fired and a new attempt started.
    Reconnecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
    },
    /// The post-malformed grace period elapsed; the application should exit.
    TerminationDue,
}

/// Errors from [`TransportConnector::send`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// There is no established stream.
    #[error("not connected")]
    NotConnected,
    /// Payload encoding failed.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The body does not fit a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// I/O tasks
// ---------------------------------------------------------------------------

enum IoEvent {
    Connected,
    ConnectFailed(std::io::Error),
    Frame(Vec<u8>),
    Oversized(FrameError),
    Closed(String),
}

type IoSender = mpsc::UnboundedSender<(u64, IoEvent)>;

/// Resolves once shutdown is requested or the connector is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn connect_task(
    host: String,
    port: u16,
    generation: u64,
    frame: FrameConfig,
    io_tx: IoSender,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream = tokio::select! {
        result = TcpStream::connect((host.as_str(), port)) => result,
        () = shutdown_requested(&mut shutdown) => return,
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = io_tx.send((generation, IoEvent::ConnectFailed(e)));
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY: {e}");
    }
    let _ = io_tx.send((generation, IoEvent::Connected));

    let (reader, writer) = stream.into_split();
    tokio::spawn(write_loop(
        writer,
        generation,
        io_tx.clone(),
        outbound_rx,
        shutdown.clone(),
    ));
    read_loop(reader, generation, frame, io_tx, shutdown).await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    generation: u64,
    frame: FrameConfig,
    io_tx: IoSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = framing::read_frame(&mut reader, &frame) => {
                let event = match result {
                    Ok(body) => IoEvent::Frame(body),
                    Err(e @ FrameError::BodyTooLarge { .. }) => IoEvent::Oversized(e),
                    Err(FrameError::ConnectionClosed) => {
                        IoEvent::Closed("peer closed the connection".to_string())
                    }
                    Err(e) => IoEvent::Closed(e.to_string()),
                };
                let done = !matches!(event, IoEvent::Frame(_));
                if io_tx.send((generation, event)).is_err() || done {
                    break;
                }
            }
            () = shutdown_requested(&mut shutdown) => break,
        }
    }
}

/// Drain `outbound_rx` into `writer`. A failed write reports the stream as
/// closed; the reader may report the same loss again.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    generation: u64,
    io_tx: IoSender,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            next = outbound_rx.recv() => {
                let Some(frame) = next else { break };
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!(generation, "Write failed: {e}");
                    let reason = format!("write failed: {e}");
                    let _ = io_tx.send((generation, IoEvent::Closed(reason)));
                    break;
                }
            }
            () = shutdown_requested(&mut shutdown) => break,
        }
    }
    let _ = writer.shutdown().await;
}

// ---------------------------------------------------------------------------
// TransportConnector
// ---------------------------------------------------------------------------

/// Owner of one outbound stream and its cipher state.
///
/// Must be driven from inside a Tokio runtime: [`connect`](Self::connect)
/// spawns the socket tasks.
pub struct TransportConnector {
    config: ConnectorConfig,
    clock: Arc<dyn Clock>,
    state: TransportState,
    target: Option<(String, u16)>,
    generation: u64,
    io_tx: IoSender,
    io_rx: mpsc::UnboundedReceiver<(u64, IoEvent)>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    shutdown: Option<watch::Sender<bool>>,
    cipher: Option<SessionCipher>,
    reconnect_at: Option<u64>,
    reconnect_attempts: u32,
    terminate_at: Option<u64>,
    terminating: bool,
    loss_hooks: Vec<Arc<dyn ConnectionLossHook>>,
}

impl TransportConnector {
    /// Create an idle connector.
    pub fn new(config: ConnectorConfig, clock: Arc<dyn Clock>) -> Self {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        Self {
            config,
            clock,
            state: TransportState::Disconnected,
            target: None,
            generation: 0,
            io_tx,
            io_rx,
            outbound: None,
            shutdown: None,
            cipher: None,
            reconnect_at: None,
            reconnect_attempts: 0,
            terminate_at: None,
            terminating: false,
            loss_hooks: Vec::new(),
        }
    }

    /// Register a hook run on every connection loss.
    pub fn add_loss_hook(&mut self, hook: Arc<dyn ConnectionLossHook>) {
        self.loss_hooks.push(hook);
    }

    /// Current socket state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Whether a cipher is installed.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Whether the connector has been flagged for termination.
    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// Whether a reconnect attempt is scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Start connecting to `host:port`. Any previous stream is dropped
    /// without running loss hooks.
    pub fn connect(&mut self, host: &str, port: u16) {
        self.target = Some((host.to_string(), port));
        self.terminating = false;
        self.terminate_at = None;
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.open();
    }

    fn open(&mut self) {
        let Some((host, port)) = self.target.clone() else {
            return;
        };
        self.teardown_io();
        self.cipher = None;
        self.generation += 1;
        self.state = TransportState::Connecting;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown_tx);

        tracing::info!(%host, port, generation = self.generation, "Connecting");
        tokio::spawn(connect_task(
            host,
            port,
            self.generation,
            self.config.frame.clone(),
            self.io_tx.clone(),
            outbound_rx,
            shutdown_rx,
        ));
    }

    fn teardown_io(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.outbound = None;
    }

    fn run_loss_hooks(&self) {
        for hook in &self.loss_hooks {
            hook.on_connection_lost();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.terminating || self.target.is_none() {
            return;
        }
        let delay = u64::try_from(self.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX);
        self.reconnect_at = Some(self.clock.now_millis().saturating_add(delay));
        tracing::info!(delay_ms = delay, "Reconnect scheduled");
    }

    /// Install the session cipher. Every body sent after this call is
    /// encrypted, and every body handed out by [`poll_event`](Self::poll_event)
    /// after this call is decrypted.
    pub fn install_cipher(
        &mut self,
        key_material: &[u8],
        role: CipherRole,
    ) -> Result<(), CipherError> {
        self.cipher = Some(SessionCipher::new(key_material, role)?);
        tracing::debug!("Session cipher installed");
        Ok(())
    }

    /// Queue a packet for sending.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let mut body = framing::encode_body(opcode, payload);
        if body.len() > self.config.frame.max_body_size {
            return Err(FrameError::BodyTooLarge {
                size: body.len(),
                max: self.config.frame.max_body_size,
            }
            .into());
        }
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.encrypt(&mut body);
        }
        let frame = framing::encode_frame(&body, &self.config.frame)?;
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)?;
        tracing::trace!(%opcode, len = payload.len(), "Queued packet");
        Ok(())
    }

    /// Encode and queue a typed message.
    pub fn send_message<M: WireMessage>(&mut self, message: &M) -> Result<(), TransportError> {
        let payload = message.to_payload()?;
        self.send(M::OPCODE, &payload)
    }

    /// Handle a dropped stream: clears cipher state, runs loss hooks and
    /// schedules a reconnect unless the connector is terminating.
    pub fn on_connection_lost(&mut self) {
        tracing::warn!(generation = self.generation, "Connection lost");
        self.teardown_io();
        self.cipher = None;
        self.state = TransportState::Lost;
        self.run_loss_hooks();
        self.schedule_reconnect();
    }

    /// Handle an unparseable frame. The connection is dropped for good and
    /// [`ConnectorEvent::TerminationDue`] fires after the grace period.
    pub fn on_malformed_packet(&mut self) {
        tracing::error!(
            grace = ?self.config.termination_grace,
            "Malformed packet, terminating after grace period"
        );
        self.terminating = true;
        self.reconnect_at = None;
        let grace = u64::try_from(self.config.termination_grace.as_millis()).unwrap_or(u64::MAX);
        self.terminate_at = Some(self.clock.now_millis().saturating_add(grace));
        self.teardown_io();
        self.cipher = None;
        self.state = TransportState::Closed;
        self.run_loss_hooks();
    }

    /// Close the connection for good. Loss hooks run if a stream or connect
    /// attempt was live.
    pub fn close(&mut self, reason: CloseReason) {
        let was_live = matches!(
            self.state,
            TransportState::Connected | TransportState::Connecting
        );
        tracing::info!(?reason, "Closing connection");
        self.terminating = true;
        self.reconnect_at = None;
        self.teardown_io();
        self.cipher = None;
        self.state = TransportState::Closed;
        if was_live {
            self.run_loss_hooks();
        }
    }

    /// Fire due timers, then hand out at most one I/O event. Never blocks.
    pub fn poll_event(&mut self) -> Option<ConnectorEvent> {
        let now = self.clock.now_millis();

        if self.terminate_at.is_some_and(|at| now >= at) {
            self.terminate_at = None;
            return Some(ConnectorEvent::TerminationDue);
        }

        if self.reconnect_at.is_some_and(|at| now >= at) {
            self.reconnect_at = None;
            if !self.terminating && self.target.is_some() {
                self.reconnect_attempts += 1;
                self.open();
                return Some(ConnectorEvent::Reconnecting {
                    attempt: self.reconnect_attempts,
                });
            }
        }

        loop {
            let (generation, event) = self.io_rx.try_recv().ok()?;
            if generation != self.generation || self.state == TransportState::Closed {
                tracing::trace!(generation, "Dropping event from a superseded connection");
                continue;
            }
            // Leftovers of a stream already reported lost.
            if self.state == TransportState::Lost {
                tracing::trace!(generation, "Dropping event from a lost connection");
                continue;
            }
            return Some(self.handle_io(event));
        }
    }

    fn handle_io(&mut self, event: IoEvent) -> ConnectorEvent {
        match event {
            IoEvent::Connected => {
                tracing::info!(generation = self.generation, "Connected");
                self.state = TransportState::Connected;
                self.reconnect_attempts = 0;
                ConnectorEvent::Connected
            }
            IoEvent::ConnectFailed(e) => {
                tracing::warn!("Connect failed: {e}");
                self.teardown_io();
                self.state = TransportState::Disconnected;
                self.schedule_reconnect();
                ConnectorEvent::ConnectFailed {
                    error: e.to_string(),
                }
            }
            IoEvent::Frame(mut body) => {
                if let Some(cipher) = self.cipher.as_mut() {
                    cipher.decrypt(&mut body);
                }
                match framing::split_body(body) {
                    Some((opcode, payload)) => {
                        tracing::trace!(%opcode, len = payload.len(), "Received packet");
                        ConnectorEvent::Packet { opcode, payload }
                    }
                    None => {
                        self.on_malformed_packet();
                        ConnectorEvent::Malformed
                    }
                }
            }
            IoEvent::Oversized(e) => {
                tracing::error!("Oversized frame: {e}");
                self.on_malformed_packet();
                ConnectorEvent::Malformed
            }
            IoEvent::Closed(reason) => {
                self.on_connection_lost();
                ConnectorEvent::Lost { reason }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pending::{PendingRequests, RequestError};
    use crate::peer::FramedPeer;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn connector(clock: &ManualClock) -> TransportConnector {
        TransportConnector::new(ConnectorConfig::default(), Arc::new(clock.clone()))
    }

    async fn next_event(connector: &mut TransportConnector) -> ConnectorEvent {
        for _ in 0..400 {
            if let Some(event) = connector.poll_event() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no connector event within 2s");
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn unused_port() -> u16 {
        let (listener, port) = listener().await;
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_connect_reports_connected() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);
        assert_eq!(connector.state(), TransportState::Connecting);

        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);
        assert_eq!(connector.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_schedules_reconnect() {
        let port = unused_port().await;
        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);

        assert!(matches!(
            next_event(&mut connector).await,
            ConnectorEvent::ConnectFailed { .. }
        ));
        assert!(connector.reconnect_pending());

        clock.advance(4_999);
        assert_eq!(connector.poll_event(), None);
        clock.advance(1);
        assert_eq!(
            connector.poll_event(),
            Some(ConnectorEvent::Reconnecting { attempt: 1 })
        );
    }

    #[tokio::test]
    async fn test_packets_flow_both_ways() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = FramedPeer::new(stream, CipherRole::Server);
            let (opcode, payload) = peer.recv().await.unwrap();
            peer.send(Opcode(opcode.0 + 1), &payload).await.unwrap();
            peer
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);

        connector.send(Opcode(0x10), b"ping").unwrap();
        assert_eq!(
            next_event(&mut connector).await,
            ConnectorEvent::Packet {
                opcode: Opcode(0x11),
                payload: b"ping".to_vec()
            }
        );
        drop(server);
    }

    #[tokio::test]
    async fn test_cipher_applies_only_after_install() {
        const KEY: &[u8] = b"shared session key";
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = FramedPeer::new(stream, CipherRole::Server);
            peer.send(Opcode(1), b"plain").await.unwrap();
            peer.install_cipher(KEY).unwrap();
            peer.send(Opcode(2), b"secret").await.unwrap();
            let (opcode, payload) = peer.recv().await.unwrap();
            (opcode, payload)
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);

        assert_eq!(
            next_event(&mut connector).await,
            ConnectorEvent::Packet {
                opcode: Opcode(1),
                payload: b"plain".to_vec()
            }
        );
        connector.install_cipher(KEY, CipherRole::Client).unwrap();
        assert_eq!(
            next_event(&mut connector).await,
            ConnectorEvent::Packet {
                opcode: Opcode(2),
                payload: b"secret".to_vec()
            }
        );

        connector.send(Opcode(3), b"reply").unwrap();
        let (opcode, payload) = server.await.unwrap();
        assert_eq!(opcode, Opcode(3));
        assert_eq!(payload, b"reply");
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_requests_once() {
        let (listener, port) = listener().await;
        let (drop_tx, drop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = drop_rx.await;
            drop(stream);
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        let pending = Arc::new(PendingRequests::<u32, ()>::new());
        connector.add_loss_hook(pending.clone());

        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let calls = Arc::clone(&calls);
            pending.insert(
                tag,
                Box::new(move |result| calls.lock().unwrap().push((tag, result))),
            );
        }

        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);
        drop_tx.send(()).unwrap();

        assert!(matches!(
            next_event(&mut connector).await,
            ConnectorEvent::Lost { .. }
        ));
        assert_eq!(connector.state(), TransportState::Lost);
        assert!(pending.is_empty());

        let mut calls = calls.lock().unwrap().clone();
        calls.sort_by_key(|(tag, _)| *tag);
        assert_eq!(
            calls,
            vec![
                (0, Err(RequestError::ConnectionLost)),
                (1, Err(RequestError::ConnectionLost)),
                (2, Err(RequestError::ConnectionLost)),
            ]
        );
        assert!(connector.reconnect_pending());
    }

    #[tokio::test]
    async fn test_malformed_frame_schedules_termination() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // One-byte body: too short for an opcode.
            stream.write_all(&[1, 0, 0xFF]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Malformed);
        assert!(connector.is_terminating());
        assert!(!connector.reconnect_pending());

        assert_eq!(connector.poll_event(), None);
        clock.advance(3_000);
        assert_eq!(connector.poll_event(), Some(ConnectorEvent::TerminationDue));
        assert_eq!(connector.poll_event(), None);
    }

    #[tokio::test]
    async fn test_close_prevents_reconnect() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);

        connector.close(CloseReason::ProtocolViolation);
        assert_eq!(connector.state(), TransportState::Closed);
        clock.advance(60_000);
        assert_eq!(connector.poll_event(), None);
        assert!(matches!(
            connector.send(Opcode(1), &[]),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_write_failure_reports_closed() {
        let (writer, peer) = tokio::io::duplex(64);
        drop(peer);
        let (io_tx, mut io_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        outbound_tx.send(vec![4, 0, 1, 0, 0, 0]).unwrap();

        write_loop(writer, 7, io_tx, outbound_rx, shutdown_rx).await;

        let Some((generation, IoEvent::Closed(reason))) = io_rx.recv().await else {
            panic!("write failure was not reported");
        };
        assert_eq!(generation, 7);
        assert!(reason.starts_with("write failed"), "{reason}");
    }

    #[tokio::test]
    async fn test_loss_reported_by_both_halves_counts_once() {
        struct Counter(Mutex<u32>);
        impl ConnectionLossHook for Counter {
            fn on_connection_lost(&self) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        let counter = Arc::new(Counter(Mutex::new(0)));
        connector.add_loss_hook(counter.clone());
        connector.connect("127.0.0.1", port);
        assert_eq!(next_event(&mut connector).await, ConnectorEvent::Connected);

        // Writer and reader both notice the dead stream.
        let generation = connector.generation;
        for reason in ["write failed: broken pipe", "peer closed the connection"] {
            connector
                .io_tx
                .send((generation, IoEvent::Closed(reason.to_string())))
                .unwrap();
        }

        assert_eq!(
            connector.poll_event(),
            Some(ConnectorEvent::Lost {
                reason: "write failed: broken pipe".to_string()
            })
        );
        assert_eq!(connector.poll_event(), None);
        assert_eq!(*counter.0.lock().unwrap(), 1);
        assert!(connector.reconnect_pending());
        assert!(matches!(
            connector.send(Opcode(1), &[]),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_before_connected_fails() {
        let clock = ManualClock::default();
        let mut connector = connector(&clock);
        assert!(matches!(
            connector.send(Opcode(1), &[]),
            Err(TransportError::NotConnected)
        ));
    }
}
