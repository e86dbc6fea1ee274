//! Per-connection lifecycle state machine.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::metrics::WsEventMetrics;
use crate::registry::ConnectionRegistry;

use super::message::{ClientEvent, OutboundEvent, ServerEvent};

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, no identity bound yet.
    Connected,
    /// Identity registered; chat messages are accepted.
    Identified,
    /// Terminal.
    Closed,
}

/// Drives one connection through identify/chat/disconnect.
///
/// The socket reader feeds every parsed client event into `handle_event`;
/// the registry entry exists exactly between a successful identify and
/// `close`.
pub struct Session {
    id: Uuid,
    state: SessionState,
    sender: mpsc::Sender<OutboundEvent>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    greeting: String,
}

impl Session {
    pub fn new(
        id: Uuid,
        sender: mpsc::Sender<OutboundEvent>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        greeting: String,
    ) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            sender,
            registry,
            broadcaster,
            greeting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Dispatch one inbound client event against the current state.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        match (self.state, event) {
            (SessionState::Connected, ClientEvent::Identify { username }) => {
                self.identify(username).await;
            }
            (SessionState::Identified, ClientEvent::Identify { .. }) => {
                // First identification wins
                WsEventMetrics::record_ignored();
                tracing::debug!(connection_id = %self.id, "Duplicate identify ignored");
            }
            (SessionState::Identified, ClientEvent::SendMessage { text }) => {
                WsEventMetrics::record_send_message();
                self.broadcaster.broadcast(self.id, text).await;
            }
            (SessionState::Connected, ClientEvent::SendMessage { .. }) => {
                WsEventMetrics::record_ignored();
                tracing::debug!(
                    connection_id = %self.id,
                    "Chat message before identification ignored"
                );
            }
            (SessionState::Closed, _) => {}
        }
    }

    async fn identify(&mut self, username: String) {
        WsEventMetrics::record_identify();

        let handle = self
            .registry
            .register(self.id, username.clone(), self.sender.clone());
        let online = self.registry.count();
        self.state = SessionState::Identified;

        // The welcome goes to this connection only; the count is a snapshot
        // taken after our own registration, so it includes us.
        let text = welcome_text(&self.greeting, &username, online);
        if handle.send(ServerEvent::welcome(text)).await.is_err() {
            tracing::debug!(
                connection_id = %self.id,
                "Connection closed before welcome could be sent"
            );
        }
    }

    /// Tear down: unregister and seal the state machine.
    ///
    /// Safe to call more than once; unregistering an absent entry is a no-op.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.registry.unregister(self.id);
            self.state = SessionState::Closed;
        }
    }
}

/// Welcome text: greeting, the submitted username, and the online count.
pub fn welcome_text(greeting: &str, username: &str, online: usize) -> String {
    let noun = if online == 1 { "user" } else { "users" };
    format!("{greeting}, {username}! {online} {noun} online.")
}
