use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::{
    WsEventMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};
use crate::registry::ConnectionRegistry;
use crate::server::AppState;

use super::message::{ClientEvent, OutboundEvent};
use super::session::Session;

const CHANNEL_BUFFER_SIZE: usize = 32;

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let connection_start = std::time::Instant::now();

    // Channel for events pushed to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(CHANNEL_BUFFER_SIZE);

    let mut session = Session::new(
        connection_id,
        tx,
        state.registry.clone(),
        state.broadcaster.clone(),
        state.settings.chat.greeting.clone(),
    );

    WS_CONNECTIONS_OPENED.inc();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing events from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound event");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for feeding inbound frames into the session state machine
    let registry = state.registry.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_frame(msg, &registry, &mut session).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %session.id(),
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
        session.close();
    });

    // Either side finishing tears the connection down
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Covers the writer finishing first; a second unregister is a no-op
    state.registry.unregister(connection_id);

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket frame
/// Returns false if the connection should be closed
async fn process_frame(
    msg: Message,
    registry: &Arc<ConnectionRegistry>,
    session: &mut Session,
) -> bool {
    match msg {
        Message::Text(text) => {
            registry.touch(session.id());

            let event: ClientEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    // Unrecognized or malformed events are dropped, never fatal
                    WsEventMetrics::record_ignored();
                    tracing::warn!(
                        connection_id = %session.id(),
                        error = %e,
                        "Ignoring malformed client event"
                    );
                    return true;
                }
            };

            session.handle_event(event).await;
            true
        }
        Message::Binary(_) => {
            WsEventMetrics::record_ignored();
            tracing::debug!(connection_id = %session.id(), "Ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            registry.touch(session.id());
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %session.id(), "Received close frame");
            false
        }
    }
}
