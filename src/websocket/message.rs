use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Events sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// First event on a new connection; binds the display name.
    Identify { username: String },
    /// Submit a chat message for fan-out to everyone else.
    ///
    /// Any extra fields (such as a client-supplied sender id) are ignored;
    /// the server resolves the sender from the registry.
    SendMessage { text: String },
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges identification, sent to the identifying connection only.
    Welcome { sender: String, text: String },
    /// Fan-out of a chat message to every connection but its sender.
    DeliverMessage { sender: String, text: String },
    /// Keepalive. Clients ignore event types they don't recognize.
    Heartbeat,
}

impl ServerEvent {
    pub fn welcome(text: impl Into<String>) -> Self {
        Self::Welcome {
            sender: "server".to_string(),
            text: text.into(),
        }
    }

    pub fn deliver(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::DeliverMessage {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Outbound event as queued on a connection's channel.
///
/// Raw events are serialized by the socket writer; fan-out paths serialize
/// once up front and share the bytes across all targets.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Raw(ServerEvent),
    Preserialized(Arc<str>),
}

impl OutboundEvent {
    /// Serialize `event` once for sharing across many connections.
    pub fn preserialized(event: &ServerEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::Preserialized(serde_json::to_string(event)?.into()))
    }

    /// JSON text to write to the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(event) => serde_json::to_string(event),
            Self::Preserialized(json) => Ok(json.as_ref().to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_wire_format() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"identify","payload":{"username":"Alice"}}"#).unwrap();
        assert!(matches!(event, ClientEvent::Identify { username } if username == "Alice"));
    }

    #[test]
    fn test_send_message_wire_format() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"send-message","payload":{"text":"hi"}}"#).unwrap();
        assert!(matches!(event, ClientEvent::SendMessage { text } if text == "hi"));
    }

    #[test]
    fn test_send_message_ignores_client_supplied_sender() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send-message","payload":{"senderId":"spoofed","text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::SendMessage { text } if text == "hi"));
    }

    #[test]
    fn test_unrecognized_event_type_fails_to_parse() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"presence","payload":{}}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"identify","payload":{}}"#);
        assert!(result.is_err(), "identify without username is malformed");
    }

    #[test]
    fn test_welcome_wire_format() {
        let json = serde_json::to_string(&ServerEvent::welcome("hello")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"welcome","payload":{"sender":"server","text":"hello"}}"#
        );
    }

    #[test]
    fn test_deliver_message_wire_format() {
        let json = serde_json::to_string(&ServerEvent::deliver("Bob", "hi")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"deliver-message","payload":{"sender":"Bob","text":"hi"}}"#
        );
    }

    #[test]
    fn test_heartbeat_wire_format() {
        let json = serde_json::to_string(&ServerEvent::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let event = ServerEvent::deliver("Bob", "hi");
        let raw = OutboundEvent::Raw(event.clone()).to_json().unwrap();
        let pre = OutboundEvent::preserialized(&event).unwrap().to_json().unwrap();
        assert_eq!(raw, pre);
    }
}
