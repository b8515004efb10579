//! Token signing and validation
//!
//! Wire format: `base64url(tunnelId|userId|expiresAtRFC3339|base64(sig))`
//! where `sig` is an HMAC-SHA256 over the first three fields, keyed by a
//! domain-separated hash of the shared secret. The outer encoding is
//! URL-safe because tokens travel in a query parameter.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Token validation failures
///
/// Every failure on untrusted input is a value, never a panic; callers map
/// all variants to the same user-facing rejection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token signature mismatch")]
    SignatureMismatch,

    #[error("Token expired")]
    Expired,

    #[error("Referenced tunnel no longer exists")]
    TunnelGone,
}

/// The claim a valid token carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaim {
    pub tunnel_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Liveness seam between token validation and the tunnel registry
///
/// A credential is only valid while its tunnel exists; the registry
/// implements this so the signer does not depend on it.
pub trait TunnelLiveness {
    fn is_live(&self, tunnel_id: &str) -> bool;
}

/// Signs and validates tunnel access credentials
///
/// The signing key is `SHA256("tunnel:" + secret)`, so the shared secret can
/// be reused by the surrounding application without the tunnel tokens being
/// interchangeable with its other signatures.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tunnel:");
        hasher.update(secret);
        Self {
            key: hasher.finalize().into(),
        }
    }

    /// Sign a credential binding `tunnel_id` and `user_id` for `ttl`
    ///
    /// The ids must not contain `|`; a token built from an id that does will
    /// simply never validate.
    pub fn sign(&self, tunnel_id: &str, user_id: &str, ttl: Duration) -> String {
        let expires_at = (Utc::now() + ttl).to_rfc3339();
        let payload = format!("{tunnel_id}|{user_id}|{expires_at}");

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}"))
    }

    /// Validate a token and return its claim
    ///
    /// Rejects on any structural defect, a signature mismatch (checked in
    /// constant time), an elapsed expiry, or a tunnel that is no longer live.
    pub fn validate(
        &self,
        token: &str,
        liveness: &dyn TunnelLiveness,
    ) -> Result<AccessClaim, TokenError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| TokenError::Malformed)?;

        let fields: Vec<&str> = decoded.split('|').collect();
        let &[tunnel_id, user_id, expires_at, signature] = fields.as_slice() else {
            return Err(TokenError::Malformed);
        };

        let signature = STANDARD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let payload = format!("{tunnel_id}|{user_id}|{expires_at}");
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::SignatureMismatch)?;

        let expires_at = DateTime::parse_from_rfc3339(expires_at)
            .map_err(|_| TokenError::Malformed)?
            .with_timezone(&Utc);
        if expires_at < Utc::now() {
            return Err(TokenError::Expired);
        }

        if !liveness.is_live(tunnel_id) {
            return Err(TokenError::TunnelGone);
        }

        Ok(AccessClaim {
            tunnel_id: tunnel_id.to_string(),
            user_id: user_id.to_string(),
            expires_at,
        })
    }
}
