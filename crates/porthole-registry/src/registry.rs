//! Tunnel table with quota enforcement and cascading removal

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use porthole_auth::TunnelLiveness;
use porthole_broker::ConnectionBroker;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// At most this many live tunnels per owner
pub const MAX_TUNNELS_PER_OWNER: usize = 5;

/// Alphabet for tunnel ids; 8 draws give a 36^8 id space
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 8;

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Owner {0} already has {MAX_TUNNELS_PER_OWNER} tunnels")]
    QuotaExceeded(String),

    #[error("Generated tunnel id collided with an existing tunnel")]
    IdCollision,
}

/// One exposed local port
///
/// Immutable once created; `local_port` is opaque to the relay and only
/// carried in metadata, `channel_id` is an opaque correlation id from the
/// surrounding application used for listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Tunnel {
    pub id: String,
    pub owner_id: String,
    pub owner_display_name: String,
    pub channel_id: String,
    pub local_port: u16,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Source of truth for tunnel metadata
///
/// Holds the broker so removal can cascade: closing the tunnel's control
/// connection and resolving its pending data requests with "none". `S` is
/// the broker's data-socket type.
pub struct TunnelRegistry<S> {
    tunnels: DashMap<String, Tunnel>,
    broker: Arc<ConnectionBroker<S>>,
}

impl<S> TunnelRegistry<S> {
    pub fn new(broker: Arc<ConnectionBroker<S>>) -> Self {
        Self {
            tunnels: DashMap::new(),
            broker,
        }
    }

    /// Create a tunnel for `owner_id`
    ///
    /// Fails when the owner is at quota. The id is drawn from a CSPRNG; on
    /// the astronomically unlikely collision with an existing id the
    /// operation fails outright rather than retrying.
    pub fn create(
        &self,
        owner_id: &str,
        owner_display_name: &str,
        channel_id: &str,
        local_port: u16,
        label: Option<String>,
    ) -> Result<Tunnel, RegistryError> {
        if self.count_by_owner(owner_id) >= MAX_TUNNELS_PER_OWNER {
            warn!(owner_id, "Tunnel quota exceeded");
            return Err(RegistryError::QuotaExceeded(owner_id.to_string()));
        }

        let tunnel = Tunnel {
            id: generate_id(),
            owner_id: owner_id.to_string(),
            owner_display_name: owner_display_name.to_string(),
            channel_id: channel_id.to_string(),
            local_port,
            label,
            created_at: Utc::now(),
        };

        match self.tunnels.entry(tunnel.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::IdCollision),
            Entry::Vacant(entry) => {
                info!(
                    tunnel_id = %tunnel.id,
                    owner_id,
                    channel_id,
                    local_port,
                    "Created tunnel"
                );
                entry.insert(tunnel.clone());
                Ok(tunnel)
            }
        }
    }

    /// Remove a tunnel, cascading to its connections
    ///
    /// Closes the control connection if one is registered and resolves every
    /// pending data request for the tunnel with "none". Idempotent; removing
    /// an absent id is a no-op.
    pub fn remove(&self, tunnel_id: &str) -> Option<Tunnel> {
        let removed = self.tunnels.remove(tunnel_id).map(|(_, tunnel)| tunnel);
        if removed.is_some() {
            self.broker.unregister_control(tunnel_id);
            info!(tunnel_id, "Removed tunnel");
        }
        removed
    }

    /// Remove every tunnel belonging to `owner_id`, with the same cascade
    pub fn remove_all_for_owner(&self, owner_id: &str) -> Vec<Tunnel> {
        let ids: Vec<String> = self
            .tunnels
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .map(|entry| entry.key().clone())
            .collect();

        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn get(&self, tunnel_id: &str) -> Option<Tunnel> {
        self.tunnels.get(tunnel_id).map(|t| t.value().clone())
    }

    pub fn list_by_channel(&self, channel_id: &str) -> Vec<Tunnel> {
        self.tunnels
            .iter()
            .filter(|entry| entry.value().channel_id == channel_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Tunnel> {
        self.tunnels
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count_by_owner(&self, owner_id: &str) -> usize {
        self.tunnels
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .count()
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }
}

/// Credentials stay valid only while their tunnel exists
impl<S> TunnelLiveness for TunnelRegistry<S> {
    fn is_live(&self, tunnel_id: &str) -> bool {
        self.tunnels.contains_key(tunnel_id)
    }
}

fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use porthole_broker::ControlHandle;
    use std::time::Duration;

    fn new_registry() -> TunnelRegistry<u32> {
        TunnelRegistry::new(Arc::new(ConnectionBroker::new()))
    }

    #[test]
    fn test_create_and_get() {
        let registry = new_registry();

        let tunnel = registry
            .create("u1", "Alice", "chan-1", 3000, Some("dev server".to_string()))
            .unwrap();

        assert_eq!(tunnel.id.len(), ID_LENGTH);
        assert!(tunnel
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        let found = registry.get(&tunnel.id).unwrap();
        assert_eq!(found, tunnel);
        assert_eq!(found.local_port, 3000);
        assert_eq!(found.owner_display_name, "Alice");
    }

    #[test]
    fn test_get_unknown() {
        let registry = new_registry();
        assert!(registry.get("nope1234").is_none());
    }

    #[test]
    fn test_quota_enforced() {
        let registry = new_registry();

        for i in 0..MAX_TUNNELS_PER_OWNER {
            registry
                .create("u1", "Alice", "chan-1", 3000 + i as u16, None)
                .unwrap();
        }
        assert_eq!(registry.count_by_owner("u1"), MAX_TUNNELS_PER_OWNER);

        // Sixth tunnel fails without mutating state
        let result = registry.create("u1", "Alice", "chan-1", 3999, None);
        assert_eq!(result, Err(RegistryError::QuotaExceeded("u1".to_string())));
        assert_eq!(registry.count_by_owner("u1"), MAX_TUNNELS_PER_OWNER);

        // Other owners are unaffected
        assert!(registry.create("u2", "Bob", "chan-1", 4000, None).is_ok());
    }

    #[test]
    fn test_quota_frees_up_after_removal() {
        let registry = new_registry();

        let first = registry.create("u1", "Alice", "chan-1", 3000, None).unwrap();
        for i in 1..MAX_TUNNELS_PER_OWNER {
            registry
                .create("u1", "Alice", "chan-1", 3000 + i as u16, None)
                .unwrap();
        }
        assert!(registry.create("u1", "Alice", "chan-1", 3999, None).is_err());

        registry.remove(&first.id);
        assert!(registry.create("u1", "Alice", "chan-1", 3999, None).is_ok());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = new_registry();
        let tunnel = registry.create("u1", "Alice", "chan-1", 3000, None).unwrap();

        assert!(registry.remove(&tunnel.id).is_some());
        assert!(registry.remove(&tunnel.id).is_none());
        assert!(registry.remove("absent99").is_none());
    }

    #[test]
    fn test_list_by_channel_and_owner() {
        let registry = new_registry();
        registry.create("u1", "Alice", "chan-a", 3000, None).unwrap();
        registry.create("u1", "Alice", "chan-b", 3001, None).unwrap();
        registry.create("u2", "Bob", "chan-a", 3002, None).unwrap();

        assert_eq!(registry.list_by_channel("chan-a").len(), 2);
        assert_eq!(registry.list_by_channel("chan-b").len(), 1);
        assert_eq!(registry.list_by_channel("chan-c").len(), 0);

        assert_eq!(registry.list_by_owner("u1").len(), 2);
        assert_eq!(registry.list_by_owner("u2").len(), 1);
    }

    #[test]
    fn test_liveness_tracks_existence() {
        let registry = new_registry();
        let tunnel = registry.create("u1", "Alice", "chan-1", 3000, None).unwrap();

        assert!(registry.is_live(&tunnel.id));
        registry.remove(&tunnel.id);
        assert!(!registry.is_live(&tunnel.id));
    }

    #[tokio::test]
    async fn test_remove_cascades_to_broker() {
        let broker = Arc::new(ConnectionBroker::<u32>::new());
        let registry = TunnelRegistry::new(broker.clone());

        let tunnel = registry.create("u1", "Alice", "chan-1", 3000, None).unwrap();
        let (handle, _rx) = ControlHandle::channel();
        broker.register_control(&tunnel.id, handle);

        let waiter = {
            let broker = broker.clone();
            let id = tunnel.id.clone();
            tokio::spawn(async move {
                broker
                    .request_data_connection(&id, "c1", Duration::from_secs(30))
                    .wait()
                    .await
            })
        };
        while broker.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        registry.remove(&tunnel.id);

        // Control connection gone, pending waiter resolved with none
        assert!(!broker.has_live_control(&tunnel.id));
        assert!(broker.control(&tunnel.id).is_none());
        let resolved = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_remove_all_for_owner() {
        let broker = Arc::new(ConnectionBroker::<u32>::new());
        let registry = TunnelRegistry::new(broker.clone());

        let t1 = registry.create("u1", "Alice", "chan-1", 3000, None).unwrap();
        let t2 = registry.create("u1", "Alice", "chan-2", 3001, None).unwrap();
        registry.create("u2", "Bob", "chan-1", 3002, None).unwrap();

        let (handle, _rx) = ControlHandle::channel();
        broker.register_control(&t1.id, handle);

        let removed = registry.remove_all_for_owner("u1");
        assert_eq!(removed.len(), 2);
        assert!(registry.get(&t1.id).is_none());
        assert!(registry.get(&t2.id).is_none());
        assert!(!broker.has_live_control(&t1.id));

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list_by_owner("u2").len(), 1);
    }

    #[test]
    fn test_ids_are_unique_across_creations() {
        let registry = new_registry();
        let mut seen = std::collections::HashSet::new();

        for i in 0..100 {
            let owner = format!("u{i}");
            let tunnel = registry.create(&owner, "X", "chan", 3000, None).unwrap();
            assert!(seen.insert(tunnel.id));
        }
    }
}
