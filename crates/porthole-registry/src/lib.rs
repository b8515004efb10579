//! Tunnel registry
//!
//! Source of truth for tunnel metadata: creation with per-owner quotas,
//! lookups, and removal with its cascade (close the control connection,
//! cancel pending data requests). Tunnel records are immutable once created,
//! so all concurrency reduces to single atomic map operations.

pub mod registry;

pub use registry::{RegistryError, Tunnel, TunnelRegistry, MAX_TUNNELS_PER_OWNER};
