//! Opcode dispatch: route incoming packets to the handler registered for the
//! current protocol phase.
//!
//! The [`PacketDispatcher`] maps an [`Opcode`] to exactly one
//! [`PacketHandler`]. Registering and clearing handlers per phase is how the
//! session state machines are enforced: a handshake handler clears itself the
//! moment it fires, so a replayed packet finds no handler.
//!
//! The table is behind a mutex because phase transitions may race with frame
//! delivery in some deployments. The lock is held only for the map operation;
//! the handler is cloned out and invoked after release, which also lets a
//! handler register or clear handlers (including itself).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connector::ConnectionLossHook;
use crate::packet::Opcode;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Outcome of handling one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// Keep the connection going.
    Pass,
    /// Unrecoverable framing or content error; drop the connection.
    Disconnect,
}

/// A packet handler over a session context `C`.
pub trait PacketHandler<C>: Send + Sync {
    /// Process one payload.
    fn handle(&self, ctx: &mut C, payload: &[u8]) -> HandlerResult;
}

impl<C, F> PacketHandler<C> for F
where
    F: Fn(&mut C, &[u8]) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &mut C, payload: &[u8]) -> HandlerResult {
        self(ctx, payload)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type HandlerTable<C> = HashMap<Opcode, Arc<dyn PacketHandler<C>>>;

/// Mutex-guarded opcode → handler table.
pub struct PacketDispatcher<C> {
    handlers: Mutex<HandlerTable<C>>,
}

impl<C: 'static> PacketDispatcher<C> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HandlerTable<C>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `opcode`, replacing any previous handler.
    pub fn register_handler<H: PacketHandler<C> + 'static>(&self, opcode: Opcode, handler: H) {
        let replaced = self.table().insert(opcode, Arc::new(handler)).is_some();
        tracing::trace!(%opcode, replaced, "Registered packet handler");
    }

    /// Remove the handler for `opcode`. Returns whether one was registered.
    pub fn clear_handler(&self, opcode: Opcode) -> bool {
        self.table().remove(&opcode).is_some()
    }

    /// Remove every handler.
    pub fn clear_all(&self) {
        let mut table = self.table();
        let count = table.len();
        table.clear();
        drop(table);
        tracing::debug!(count, "Cleared all packet handlers");
    }

    /// Whether a handler is registered for `opcode`.
    pub fn is_registered(&self, opcode: Opcode) -> bool {
        self.table().contains_key(&opcode)
    }

    /// Registered opcodes in ascending order.
    pub fn registered_opcodes(&self) -> Vec<Opcode> {
        let mut opcodes: Vec<Opcode> = self.table().keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }

    /// Route a packet to its handler.
    ///
    /// An opcode with no handler is logged and dropped: servers may send
    /// packets this client does not understand, and that is never fatal.
    pub fn dispatch(&self, ctx: &mut C, opcode: Opcode, payload: &[u8]) -> HandlerResult {
        let handler = self.table().get(&opcode).cloned();
        match handler {
            Some(handler) => {
                let result = handler.handle(ctx, payload);
                if result == HandlerResult::Disconnect {
                    tracing::warn!(%opcode, "Handler requested disconnect");
                }
                result
            }
            None => {
                tracing::warn!(%opcode, len = payload.len(), "No handler registered, dropping packet");
                HandlerResult::Pass
            }
        }
    }
}

impl<C: 'static> Default for PacketDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> ConnectionLossHook for PacketDispatcher<C> {
    fn on_connection_lost(&self) {
        self.clear_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
