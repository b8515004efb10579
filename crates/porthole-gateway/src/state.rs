//! Shared gateway state

use axum::extract::ws::WebSocket;
use porthole_auth::TokenSigner;
use porthole_broker::ConnectionBroker;
use porthole_registry::{Tunnel, TunnelRegistry};
use std::sync::Arc;

use crate::config::GatewayConfig;

/// State shared across gateway handlers
///
/// The embedding application keeps a clone of this to create and remove
/// tunnels (owner actions happen in-process) and to mint tokens for users it
/// has authenticated through its own identity system.
pub struct GatewayState {
    pub registry: Arc<TunnelRegistry<WebSocket>>,
    pub broker: Arc<ConnectionBroker<WebSocket>>,
    pub signer: TokenSigner,
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Wire up registry, broker and signer from the shared signing secret
    pub fn new(secret: &[u8], config: GatewayConfig) -> Arc<Self> {
        let broker = Arc::new(ConnectionBroker::new());
        let registry = Arc::new(TunnelRegistry::new(broker.clone()));
        Arc::new(Self {
            registry,
            broker,
            signer: TokenSigner::new(secret),
            config,
        })
    }

    /// One-time access token granting `user_id` entry to a tunnel
    ///
    /// Handed to a user by the embedding application; exchanged for a
    /// session cookie on first use.
    pub fn issue_access_token(&self, tunnel_id: &str, user_id: &str) -> String {
        self.signer
            .sign(tunnel_id, user_id, self.config.access_token_ttl)
    }

    /// Token the tunnel's owner presents when attaching the control connection
    pub fn issue_control_token(&self, tunnel: &Tunnel) -> String {
        self.signer
            .sign(&tunnel.id, &tunnel.owner_id, self.config.access_token_ttl)
    }
}
