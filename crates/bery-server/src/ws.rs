//! WebSocket transport.
//!
//! Each accepted socket gets a registry entry and an outbound queue. A
//! writer task drains the queue into the socket while the read loop decodes
//! text frames and hands them to the router.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

use bery_shared::constants::OUTBOUND_QUEUE_CAPACITY;
use bery_shared::Envelope;

use crate::api::AppState;
use crate::error::ServerError;

/// `GET /ws`
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let slot = state.admit()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, slot)))
}

/// `_slot` is released when the connection ends.
async fn handle_socket(socket: WebSocket, state: AppState, _slot: Option<OwnedSemaphorePermit>) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE_CAPACITY);
    let id = state.registry.write().accept(outbound_tx);
    info!(conn = %id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match envelope.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %id, error = %e, "Failed to encode outbound envelope");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(conn = %id, error = %e, "WebSocket send failed, stopping writer");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match Envelope::decode(&text) {
                Ok(envelope) => state.router.dispatch(id, envelope),
                Err(e) => warn!(conn = %id, error = %e, "Dropping malformed envelope"),
            },
            Ok(Message::Close(_)) => break,
            // axum answers pings itself; binary frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                warn!(conn = %id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    let identity = state
        .registry
        .write()
        .close(id)
        .and_then(|conn| conn.identity);
    writer.abort();

    info!(conn = %id, user = ?identity, "WebSocket disconnected");
}
