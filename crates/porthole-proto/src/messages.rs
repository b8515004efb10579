//! Control-connection message types
//!
//! The relay sends these to the exposing client as JSON text frames over the
//! control WebSocket. The client never sends protocol messages back on the
//! control connection; it answers by dialing a new data connection that
//! carries the `connection_id` it was given.

use serde::{Deserialize, Serialize};

/// Transport mode requested for a data connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// One framed request/response exchange
    Http,
    /// A bridged WebSocket stream
    Websocket,
}

/// Messages sent relay -> client over the control connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Ask the client to open a fresh data connection identified by
    /// `connection_id`. For websocket mode the requested path is included so
    /// the client can open the upgrade against its local server.
    Open {
        #[serde(rename = "connectionId")]
        connection_id: String,
        mode: OpenMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl ControlMessage {
    /// An `open` instruction for a plain HTTP exchange
    pub fn open_http(connection_id: impl Into<String>) -> Self {
        Self::Open {
            connection_id: connection_id.into(),
            mode: OpenMode::Http,
            path: None,
        }
    }

    /// An `open` instruction for a bridged WebSocket stream
    pub fn open_websocket(connection_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Open {
            connection_id: connection_id.into(),
            mode: OpenMode::Websocket,
            path: Some(path.into()),
        }
    }
}
