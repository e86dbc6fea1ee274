//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::{OutboundEvent, ServerEvent};

/// Handle for a single identified WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub username: String,
    pub sender: mpsc::Sender<OutboundEvent>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(id: Uuid, username: String, sender: mpsc::Sender<OutboundEvent>) -> Self {
        let now = Utc::now();
        Self {
            id,
            username,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Send a ServerEvent (serialized when written to the socket)
    pub async fn send(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::SendError<OutboundEvent>> {
        self.sender.send(OutboundEvent::Raw(event)).await
    }

    /// Send a pre-serialized event (for fan-out to many connections)
    pub async fn send_preserialized(
        &self,
        event: OutboundEvent,
    ) -> Result<(), mpsc::error::SendError<OutboundEvent>> {
        self.sender.send(event).await
    }
}
