//! Owner-facing attach endpoints
//!
//! The exposing client holds one long-lived control WebSocket per tunnel and
//! dials a short-lived data WebSocket for every `open` instruction, carrying
//! the connection id the relay chose in the URL.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use porthole_broker::ControlHandle;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::GatewayState;

#[derive(Deserialize)]
pub(crate) struct ControlAttachQuery {
    token: String,
}

/// `GET /tunnel-connect/{tunnel_id}/control?token=...`
///
/// Becomes the tunnel's control connection on upgrade. The token must be
/// signed for this tunnel and its user must be the tunnel's owner.
pub(crate) async fn control_attach(
    State(state): State<Arc<GatewayState>>,
    Path(tunnel_id): Path<String>,
    Query(query): Query<ControlAttachQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(tunnel) = state.registry.get(&tunnel_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let claim = match state.signer.validate(&query.token, state.registry.as_ref()) {
        Ok(claim) => claim,
        Err(err) => {
            warn!(tunnel_id, %err, "Control attach rejected");
            return StatusCode::FORBIDDEN.into_response();
        }
    };
    if claim.tunnel_id != tunnel_id || claim.user_id != tunnel.owner_id {
        warn!(tunnel_id, user_id = %claim.user_id, "Control attach by non-owner");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| run_control(state, tunnel_id, socket))
}

/// Pump control messages onto the owner's socket until either side ends
///
/// Registering overwrites a stale handle without closing it (the client
/// reconnects deliberately); cleanup therefore only unregisters this task's
/// own handle so a replacement survives a late disconnect.
async fn run_control(state: Arc<GatewayState>, tunnel_id: String, socket: WebSocket) {
    let (handle, mut outbound) = ControlHandle::channel();
    let handle_id = handle.id();
    state.broker.register_control(&tunnel_id, handle);
    info!(tunnel_id, "Control connection attached");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    // Serialization of control messages cannot fail; guard anyway
                    let Ok(text) = serde_json::to_string(&msg) else { break };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Handle dropped: the tunnel was removed or unregistered
                None => break,
            },
            incoming = stream.next() => match incoming {
                // The client sends nothing meaningful on the control
                // connection; only its close (or an error) matters
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.close().await;
    state.broker.unregister_control_exact(&tunnel_id, handle_id);
    info!(tunnel_id, "Control connection detached");
}

/// `GET /tunnel-connect/{tunnel_id}/data/{connection_id}`
///
/// Hands the upgraded socket to the waiter the relay registered for this
/// connection id. The id is an unguessable UUID that was only ever sent over
/// the authenticated control connection; a socket arriving with no matching
/// waiter is closed immediately.
pub(crate) async fn data_attach(
    State(state): State<Arc<GatewayState>>,
    Path((tunnel_id, connection_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        match state
            .broker
            .supply_data_connection(&tunnel_id, &connection_id, socket)
        {
            Ok(()) => debug!(tunnel_id, connection_id, "Data connection supplied"),
            Err(mut socket) => {
                // Late, timed out, or unsolicited: never leave it open
                let _ = socket.send(Message::Close(None)).await;
            }
        }
    })
}
