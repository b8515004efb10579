//! Bidirectional WebSocket relay
//!
//! Connects an external caller's WebSocket to a tunnel's data WebSocket.
//! Each direction forwards one message at a time, preserving message type;
//! the first direction to see a close frame, an error, or end-of-stream
//! cancels the other through a shared token, and both sockets are closed
//! best-effort.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Relay messages between `caller` and `data` until either side ends
pub async fn bridge(caller: WebSocket, data: WebSocket) {
    let cancel = CancellationToken::new();
    let (caller_tx, caller_rx) = caller.split();
    let (data_tx, data_rx) = data.split();

    tokio::join!(
        forward(caller_rx, data_tx, cancel.clone()),
        forward(data_rx, caller_tx, cancel.clone()),
    );
    trace!("Bridge finished");
}

async fn forward(
    mut rx: SplitStream<WebSocket>,
    mut tx: SplitSink<WebSocket, Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.next() => match msg {
                Some(Ok(msg)) => {
                    // A close frame is still forwarded, then ends this direction
                    let is_close = matches!(msg, Message::Close(_));
                    if tx.send(msg).await.is_err() || is_close {
                        break;
                    }
                }
                Some(Err(_)) | None => break,
            },
        }
    }
    cancel.cancel();
    // The peer may already be gone; close errors are expected here
    let _ = tx.close().await;
}
