use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::BroadcastMetrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::websocket::{OutboundEvent, ServerEvent};

/// Maximum number of concurrent per-target sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Result of one broadcast fan-out
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Number of connections the message was delivered to
    pub delivered_to: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
}

/// Counters for the broadcast engine
#[derive(Debug, Default)]
struct BroadcasterStats {
    /// Total broadcasts performed
    messages_broadcast: AtomicU64,
    /// Total successful per-connection deliveries
    total_delivered: AtomicU64,
    /// Total failed per-connection deliveries
    total_failed: AtomicU64,
    /// Messages dropped because the sender was no longer registered
    dropped_unknown_sender: AtomicU64,
}

impl BroadcasterStats {
    fn snapshot(&self) -> BroadcasterStatsSnapshot {
        BroadcasterStatsSnapshot {
            messages_broadcast: self.messages_broadcast.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            dropped_unknown_sender: self.dropped_unknown_sender.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of broadcast statistics
#[derive(Debug, Clone, Serialize)]
pub struct BroadcasterStatsSnapshot {
    pub messages_broadcast: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub dropped_unknown_sender: u64,
}

/// Delivers chat messages to every registered connection except the sender.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    stats: BroadcasterStats,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: BroadcasterStats::default(),
        }
    }

    /// Get broadcast statistics
    pub fn stats(&self) -> BroadcasterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Broadcast a chat message from `sender_id` to all other connections.
    ///
    /// The sender's display name is resolved from the registry at call time;
    /// a sender that disconnected mid-flight or never identified drops the
    /// message silently. Targets are a snapshot of the registry - connections
    /// joining afterwards do not receive this message.
    #[tracing::instrument(
        name = "broadcast.message",
        skip(self, text),
        fields(sender_id = %sender_id)
    )]
    pub async fn broadcast(&self, sender_id: Uuid, text: String) -> DeliveryResult {
        let Some(username) = self.registry.lookup(sender_id) else {
            self.stats
                .dropped_unknown_sender
                .fetch_add(1, Ordering::Relaxed);
            BroadcastMetrics::record_dropped();
            tracing::debug!(sender_id = %sender_id, "Sender not registered, dropping message");
            return DeliveryResult {
                delivered_to: 0,
                failed: 0,
            };
        };

        let targets = self.registry.snapshot_except(sender_id);
        let event = ServerEvent::deliver(username, text);
        let (delivered, failed) = self.deliver_to_connections(&targets, &event).await;

        self.stats.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);

        BroadcastMetrics::record_broadcast();
        BroadcastMetrics::record_delivered(delivered as u64);
        BroadcastMetrics::record_failed(failed as u64);

        tracing::debug!(
            sender_id = %sender_id,
            delivered = delivered,
            failed = failed,
            "Broadcast delivered"
        );

        DeliveryResult {
            delivered_to: delivered,
            failed,
        }
    }

    /// Send an event to a list of connections.
    ///
    /// A target whose channel is already torn down is skipped; it never
    /// aborts delivery to the remaining targets. Larger fan-outs serialize
    /// the event once and send with bounded parallelism.
    async fn deliver_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        event: &ServerEvent,
    ) -> (usize, usize) {
        if connections.is_empty() {
            return (0, 0);
        }

        // For a handful of targets, sequential sending is cheaper than the
        // concurrency machinery
        if connections.len() <= 3 {
            let mut delivered = 0;
            let mut failed = 0;
            for conn in connections {
                match conn.send(event.clone()).await {
                    Ok(_) => delivered += 1,
                    Err(_) => failed += 1,
                }
            }
            return (delivered, failed);
        }

        // Serialize once and share across all targets
        let outbound = match OutboundEvent::preserialized(event) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize event, falling back to per-connection serialization");
                OutboundEvent::Raw(event.clone())
            }
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;
        let mut pending = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });
            pending += 1;

            // Drain completed sends when we hit the concurrency limit
            while pending >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => {
                        pending -= 1;
                        delivered += 1;
                    }
                    Some(false) => {
                        pending -= 1;
                        failed += 1;
                    }
                    None => break,
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        (delivered, failed)
    }
}
