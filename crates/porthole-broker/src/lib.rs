//! Connection brokering between tunnel owners and the proxy gateway
//!
//! Tracks, per tunnel, the single live control connection and the pending
//! data-connection requests the relay has outstanding against it. The relay
//! cannot dial the exposing client (it is typically behind NAT); it asks the
//! client over the always-open control connection to dial out and
//! self-identify with the connection id the relay chose.

pub mod broker;
pub mod control;

pub use broker::{ConnectionBroker, PendingDataRequest};
pub use control::{ControlHandle, ControlSendError};
