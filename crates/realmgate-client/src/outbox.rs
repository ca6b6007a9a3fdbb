//! Ordered queue of transport actions produced by packet handlers.
//!
//! Handlers run with a borrowed session context and never touch the
//! connector directly. They queue sends and cipher installs here, and the
//! session applies them in order once the handler returns, so a reply sent
//! before a cipher switch stays plaintext and everything after it does not.

use std::collections::VecDeque;

use realmgate_net::{
    CipherRole, Opcode, PacketError, TransportConnector, TransportError, WireMessage,
};

use crate::error::BotError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Send(Opcode, Vec<u8>),
    InstallCipher(Vec<u8>),
}

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    actions: VecDeque<Action>,
}

impl Outbox {
    pub(crate) fn send_message<M: WireMessage>(&mut self, message: &M) -> Result<(), BotError> {
        let payload = message
            .to_payload()
            .map_err(|source: PacketError| BotError::Packet {
                opcode: M::OPCODE,
                source,
            })?;
        self.actions.push_back(Action::Send(M::OPCODE, payload));
        Ok(())
    }

    pub(crate) fn send_raw(&mut self, opcode: Opcode, payload: Vec<u8>) {
        self.actions.push_back(Action::Send(opcode, payload));
    }

    pub(crate) fn install_cipher(&mut self, key_material: &[u8]) {
        self.actions.push_back(Action::InstallCipher(key_material.to_vec()));
    }

    pub(crate) fn clear(&mut self) {
        self.actions.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    /// Apply every queued action to `connector`, oldest first. Stops at the
    /// first failure; the remaining actions are discarded.
    ///
    /// A stream that is down is not an error here: the connector reports the
    /// loss as an event and the session rejoins after the reconnect.
    pub(crate) fn flush(&mut self, connector: &mut TransportConnector) -> Result<(), BotError> {
        if !self.actions.is_empty() {
            tracing::trace!(queued = self.len(), "Flushing outbox");
        }
        while let Some(action) = self.actions.pop_front() {
            let applied = match action {
                Action::Send(opcode, payload) => connector
                    .send(opcode, &payload)
                    .map_err(BotError::from),
                Action::InstallCipher(key) => connector
                    .install_cipher(&key, CipherRole::Client)
                    .map_err(BotError::from),
            };
            match applied {
                Ok(()) => {}
                Err(BotError::Transport(TransportError::NotConnected)) => {
                    tracing::debug!(
                        dropped = self.len() + 1,
                        "Connection down, dropping queued actions"
                    );
                    self.actions.clear();
                    return Ok(());
                }
                Err(e) => {
                    self.actions.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
