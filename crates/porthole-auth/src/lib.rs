//! Signed-token authentication for tunnel access
//!
//! Tokens are stateless: validity is a function of the HMAC signature and
//! the clock, plus a liveness check that the referenced tunnel still exists.
//! No token store and no revocation list are needed; removing a tunnel
//! invalidates every credential scoped to it.

pub mod signer;

pub use signer::{AccessClaim, TokenError, TokenSigner, TunnelLiveness};
