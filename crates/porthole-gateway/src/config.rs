//! Gateway configuration

use std::time::Duration;

/// Tunable knobs for the proxy gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Lifetime of one-time access tokens (exchanged for a cookie)
    pub access_token_ttl: chrono::Duration,
    /// Lifetime of session cookies (re-validated per request)
    pub session_cookie_ttl: chrono::Duration,
    /// How long to wait for the owner to supply a data connection
    pub data_connection_timeout: Duration,
    /// Mark session cookies `Secure` even when the inbound hop looks like
    /// plain HTTP (set this when TLS terminates upstream without a
    /// forwarded-proto header)
    pub secure_cookies: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: chrono::Duration::minutes(5),
            session_cookie_ttl: chrono::Duration::minutes(30),
            data_connection_timeout: Duration::from_secs(10),
            secure_cookies: false,
        }
    }
}
