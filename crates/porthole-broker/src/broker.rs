//! Control-connection table and pending data-connection waiters
//!
//! Both tables are concurrent maps with single-operation mutations; a waiter
//! is resolved exactly once, by whichever of supply or timeout happens
//! first. Generic over the data-socket type so the tables can be exercised
//! without a live transport.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::ControlHandle;
use tokio::sync::oneshot;

/// Key of one outstanding data-connection request
type WaiterKey = (String, String);

/// Brokers control connections and data-connection handoff for all tunnels
///
/// `S` is the data-socket type supplied by the transport layer.
pub struct ConnectionBroker<S> {
    controls: DashMap<String, ControlHandle>,
    waiters: Arc<DashMap<WaiterKey, oneshot::Sender<S>>>,
}

impl<S> ConnectionBroker<S> {
    pub fn new() -> Self {
        Self {
            controls: DashMap::new(),
            waiters: Arc::new(DashMap::new()),
        }
    }

    /// Store `handle` as the tunnel's current control connection
    ///
    /// Overwrites any previous entry without closing it; a client that
    /// reconnects deliberately replaces its stale handle, and the stale
    /// writer shuts down on its own when its socket drops.
    pub fn register_control(&self, tunnel_id: &str, handle: ControlHandle) {
        debug!(tunnel_id, handle_id = %handle.id(), "Registered control connection");
        self.controls.insert(tunnel_id.to_string(), handle);
    }

    /// Remove the tunnel's control connection and cancel its pending waiters
    pub fn unregister_control(&self, tunnel_id: &str) {
        if self.controls.remove(tunnel_id).is_some() {
            debug!(tunnel_id, "Unregistered control connection");
        }
        self.cancel_waiters(tunnel_id);
    }

    /// Remove the control connection only if it is still the given handle
    ///
    /// Used by a connection's own disconnect cleanup so it cannot tear down
    /// a replacement that was registered while it was dying.
    pub fn unregister_control_exact(&self, tunnel_id: &str, handle_id: Uuid) {
        let removed = self
            .controls
            .remove_if(tunnel_id, |_, handle| handle.id() == handle_id)
            .is_some();
        if removed {
            debug!(tunnel_id, %handle_id, "Unregistered control connection");
            self.cancel_waiters(tunnel_id);
        }
    }

    /// Whether the tunnel has a control connection whose transport is still open
    pub fn has_live_control(&self, tunnel_id: &str) -> bool {
        self.controls
            .get(tunnel_id)
            .map(|handle| handle.is_open())
            .unwrap_or(false)
    }

    /// The tunnel's current control handle, if any
    pub fn control(&self, tunnel_id: &str) -> Option<ControlHandle> {
        self.controls.get(tunnel_id).map(|h| h.value().clone())
    }

    /// Register a waiter for the data connection `connection_id`
    ///
    /// The waiter is in place before this returns, so the `open` control
    /// message can be sent afterwards and even an instant client cannot race
    /// the registration. The returned request resolves with the socket the
    /// first time `supply_data_connection` is called with a matching key, or
    /// with `None` once `timeout` elapses; the entry is removed on either
    /// outcome, and also if the request is dropped (caller disconnect).
    pub fn request_data_connection(
        &self,
        tunnel_id: &str,
        connection_id: &str,
        timeout: Duration,
    ) -> PendingDataRequest<S> {
        let key = (tunnel_id.to_string(), connection_id.to_string());
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(key.clone(), tx);

        PendingDataRequest {
            rx,
            timeout,
            guard: WaiterGuard {
                waiters: self.waiters.clone(),
                key,
            },
        }
    }

    /// Hand a freshly dialed data connection to its waiter
    ///
    /// If no waiter exists (late arrival, already timed out, or unsolicited)
    /// the socket is handed back so the caller can abort it; unsolicited
    /// data connections must never be left open.
    pub fn supply_data_connection(
        &self,
        tunnel_id: &str,
        connection_id: &str,
        socket: S,
    ) -> Result<(), S> {
        let key = (tunnel_id.to_string(), connection_id.to_string());
        match self.waiters.remove(&key) {
            Some((_, tx)) => tx.send(socket).map_err(|socket| {
                warn!(tunnel_id, connection_id, "Waiter gone before handoff");
                socket
            }),
            None => {
                warn!(tunnel_id, connection_id, "Unsolicited data connection");
                Err(socket)
            }
        }
    }

    /// Number of outstanding data-connection requests across all tunnels
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    fn cancel_waiters(&self, tunnel_id: &str) {
        // Dropping the senders resolves every receiver with "none"
        let before = self.waiters.len();
        self.waiters.retain(|(tid, _), _| tid != tunnel_id);
        let cancelled = before - self.waiters.len();
        if cancelled > 0 {
            debug!(tunnel_id, cancelled, "Cancelled pending data requests");
        }
    }
}

impl<S> Default for ConnectionBroker<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// One outstanding request for a data connection
///
/// Resolves exactly once; dropping it withdraws the waiter.
pub struct PendingDataRequest<S> {
    rx: oneshot::Receiver<S>,
    timeout: Duration,
    guard: WaiterGuard<S>,
}

impl<S> PendingDataRequest<S> {
    /// Wait for the socket, or `None` on timeout or cancellation
    pub async fn wait(self) -> Option<S> {
        let Self {
            rx,
            timeout,
            guard: _guard,
        } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(socket)) => Some(socket),
            // Timer fired, or the sender was dropped by a cancel
            _ => None,
        }
    }
}

/// Removes the waiter entry once the request resolves or is dropped
struct WaiterGuard<S> {
    waiters: Arc<DashMap<WaiterKey, oneshot::Sender<S>>>,
    key: WaiterKey,
}

impl<S> Drop for WaiterGuard<S> {
    fn drop(&mut self) {
        self.waiters.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    /// Stand-in data socket for tests
    #[derive(Debug, PartialEq)]
    struct FakeSocket(u32);

    #[tokio::test]
    async fn test_register_and_liveness() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();
        let (handle, _rx) = ControlHandle::channel();

        assert!(!broker.has_live_control("t1"));
        broker.register_control("t1", handle);
        assert!(broker.has_live_control("t1"));
    }

    #[tokio::test]
    async fn test_liveness_tracks_transport_state() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();
        let (handle, rx) = ControlHandle::channel();
        broker.register_control("t1", handle);

        // Writer task gone: still registered, no longer live
        drop(rx);
        assert!(!broker.has_live_control("t1"));
        assert!(broker.control("t1").is_some());
    }

    #[tokio::test]
    async fn test_supply_resolves_waiter() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let pending = broker.request_data_connection("t1", "c1", Duration::from_secs(5));
        assert_eq!(broker.pending_count(), 1);

        broker
            .supply_data_connection("t1", "c1", FakeSocket(7))
            .unwrap();
        assert_eq!(pending.wait().await, Some(FakeSocket(7)));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_to_none() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let started = Instant::now();
        let result = broker
            .request_data_connection("t1", "c1", Duration::from_millis(50))
            .wait()
            .await;

        assert_eq!(result, None);
        // Not earlier than the timeout, not unbounded
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unsolicited_socket_handed_back() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let result = broker.supply_data_connection("t1", "nope", FakeSocket(1));
        assert_eq!(result, Err(FakeSocket(1)));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_supply_after_timeout() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let result = broker
            .request_data_connection("t1", "c1", Duration::from_millis(1))
            .wait()
            .await;
        assert_eq!(result, None);

        // The waiter is gone; the late socket comes back for aborting
        let result = broker.supply_data_connection("t1", "c1", FakeSocket(2));
        assert_eq!(result, Err(FakeSocket(2)));
    }

    #[tokio::test]
    async fn test_unregister_cancels_pending_waiters() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();
        let (handle, _rx) = ControlHandle::channel();
        broker.register_control("t1", handle);

        let pending = broker.request_data_connection("t1", "c1", Duration::from_secs(30));
        broker.unregister_control("t1");

        // Resolves to none well before the 30s timeout
        let result = tokio::time::timeout(Duration::from_secs(1), pending.wait())
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(!broker.has_live_control("t1"));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unregister_leaves_other_tunnels_alone() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let pending = broker.request_data_connection("t2", "c1", Duration::from_secs(5));
        broker.unregister_control("t1");
        assert_eq!(broker.pending_count(), 1);

        broker
            .supply_data_connection("t2", "c1", FakeSocket(3))
            .unwrap();
        assert_eq!(pending.wait().await, Some(FakeSocket(3)));
    }

    #[tokio::test]
    async fn test_exact_unregister_spares_replacement() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let (stale, _rx_stale) = ControlHandle::channel();
        let stale_id = stale.id();
        broker.register_control("t1", stale);

        // Owner reconnects; new handle replaces the stale one
        let (fresh, _rx_fresh) = ControlHandle::channel();
        let fresh_id = fresh.id();
        broker.register_control("t1", fresh);

        // Stale connection's cleanup fires late; must not remove the fresh handle
        broker.unregister_control_exact("t1", stale_id);
        assert!(broker.has_live_control("t1"));
        assert_eq!(broker.control("t1").unwrap().id(), fresh_id);

        broker.unregister_control_exact("t1", fresh_id);
        assert!(!broker.has_live_control("t1"));
    }

    #[tokio::test]
    async fn test_dropped_request_removes_waiter() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let pending = broker.request_data_connection("t1", "c1", Duration::from_secs(30));
        assert_eq!(broker.pending_count(), 1);

        // Caller disconnects: the request is dropped mid-wait
        drop(pending);
        assert_eq!(broker.pending_count(), 0);

        let result = broker.supply_data_connection("t1", "c1", FakeSocket(2));
        assert_eq!(result, Err(FakeSocket(2)));
    }

    #[tokio::test]
    async fn test_connection_ids_are_independent() {
        let broker: ConnectionBroker<FakeSocket> = ConnectionBroker::new();

        let pendings: Vec<_> = (0..3)
            .map(|i| broker.request_data_connection("t1", &format!("c{i}"), Duration::from_secs(5)))
            .collect();
        assert_eq!(broker.pending_count(), 3);

        // Supply out of order; each key resolves its own waiter
        broker
            .supply_data_connection("t1", "c2", FakeSocket(2))
            .unwrap();
        broker
            .supply_data_connection("t1", "c0", FakeSocket(0))
            .unwrap();
        broker
            .supply_data_connection("t1", "c1", FakeSocket(1))
            .unwrap();

        for (i, pending) in pendings.into_iter().enumerate() {
            assert_eq!(pending.wait().await, Some(FakeSocket(i as u32)));
        }
    }
}
