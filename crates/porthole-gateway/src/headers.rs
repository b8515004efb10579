//! Header, cookie and query helpers for the proxy path

/// Query parameter carrying a one-time access token
pub const TOKEN_QUERY_PARAM: &str = "_tunnel_token";

/// Headers never forwarded in either direction (RFC 9110 hop-by-hop set)
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a request header may be forwarded to the exposed service
///
/// Drops hop-by-hop headers, `Host` (the local service has its own), and
/// the WebSocket negotiation headers (data connections run their own
/// upgrade). `Cookie` passes, but see [`strip_cookie`].
pub fn is_forwardable_request_header(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
        && !name.eq_ignore_ascii_case("host")
        && !name.to_ascii_lowercase().starts_with("sec-websocket-")
}

/// Whether a response header may be copied to the external caller
///
/// `Content-Length` is recomputed from the relayed body.
pub fn is_forwardable_response_header(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
        && !name.eq_ignore_ascii_case("content-length")
}

/// Name of the session cookie scoped to one tunnel
pub fn cookie_name(tunnel_id: &str) -> String {
    format!("tunnel_{tunnel_id}")
}

/// Build the `Set-Cookie` value for a freshly minted session cookie
pub fn session_cookie(tunnel_id: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/tunnel/{}/; Max-Age={}",
        cookie_name(tunnel_id),
        value,
        tunnel_id,
        max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extract one cookie's value from a `Cookie` header
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// A `Cookie` header with the gateway's own cookie removed, if anything is left
pub fn strip_cookie(header: &str, name: &str) -> Option<String> {
    let remaining: Vec<&str> = header
        .split(';')
        .map(str::trim)
        .filter(|pair| {
            pair.split_once('=')
                .map(|(k, _)| k != name)
                .unwrap_or(true)
        })
        .collect();
    if remaining.is_empty() {
        None
    } else {
        Some(remaining.join("; "))
    }
}

/// Look up one query parameter in a raw query string
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// The query string with the access-token parameter removed
///
/// Used to build the redirect target so tokens never linger in browser
/// history. `None` when nothing remains.
pub fn strip_token_query(query: &str) -> Option<String> {
    let remaining: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            pair.split_once('=')
                .map(|(k, _)| k != TOKEN_QUERY_PARAM)
                .unwrap_or(true)
        })
        .collect();
    if remaining.is_empty() {
        None
    } else {
        Some(remaining.join("&"))
    }
}
