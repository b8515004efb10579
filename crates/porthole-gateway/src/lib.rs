//! HTTP/WebSocket proxy gateway for tunnels
//!
//! External callers reach an exposed service through `/tunnel/{id}/...` on
//! the relay; the gateway authenticates them with signed tokens/cookies,
//! asks the tunnel's owner for a data connection over the control
//! connection, and relays bytes. Tunnel owners attach their control and data
//! WebSockets under `/tunnel-connect/...`.
//!
//! The router is built to be merged into a host application's axum router;
//! requests outside these path prefixes are not its concern. Tunnel
//! management (create/remove/list) is an in-process API on
//! [`GatewayState`]/`TunnelRegistry`, driven by the embedding application.

pub mod attach;
pub mod bridge;
pub mod config;
pub mod headers;
pub mod proxy;
pub mod state;

pub use config::GatewayConfig;
pub use state::GatewayState;

use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;

/// Build the gateway router
pub fn router(state: Arc<GatewayState>) -> Router {
    // The tunnel root needs all three shapes: `{*path}` does not match an
    // empty rest, so the bare id and the trailing slash are separate routes
    Router::new()
        .route("/tunnel/{tunnel_id}", any(proxy::proxy))
        .route("/tunnel/{tunnel_id}/", any(proxy::proxy))
        .route("/tunnel/{tunnel_id}/{*path}", any(proxy::proxy))
        .route(
            "/tunnel-connect/{tunnel_id}/control",
            get(attach::control_attach),
        )
        .route(
            "/tunnel-connect/{tunnel_id}/data/{connection_id}",
            get(attach::data_attach),
        )
        .with_state(state)
}
