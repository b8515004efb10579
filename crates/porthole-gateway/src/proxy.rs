//! Public proxy endpoint for `/tunnel/{id}/...`
//!
//! Every request is authenticated against the tunnel's signed credentials,
//! then served over a fresh data connection requested from the tunnel owner:
//! plain requests as one framed exchange, WebSocket upgrades as a bridged
//! stream.

use axum::body::{to_bytes, Body};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use porthole_broker::PendingDataRequest;
use porthole_proto::{
    decode_response, encode_request, ControlMessage, RequestHead, MAX_FRAME_SIZE,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge;
use crate::headers::{
    self, cookie_name, is_forwardable_request_header, is_forwardable_response_header,
    TOKEN_QUERY_PARAM,
};
use crate::state::GatewayState;

pub(crate) async fn proxy(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    let uri = parts.uri.clone();
    let Some((tunnel_id, forward_path)) = split_tunnel_path(uri.path()) else {
        return status_page(StatusCode::NOT_FOUND, "Tunnel not found");
    };
    let tunnel_id = tunnel_id.to_string();
    let query = uri.query().unwrap_or("");

    if state.registry.get(&tunnel_id).is_none() {
        return status_page(StatusCode::NOT_FOUND, "Tunnel not found");
    }

    // A token in the query is exchanged for a session cookie and redirected,
    // so the one-time token never lingers in the address bar or history
    if let Some(token) = headers::query_param(query, TOKEN_QUERY_PARAM) {
        return exchange_token(&state, &tunnel_id, uri.path(), query, &token, &parts.headers);
    }

    if !session_cookie_valid(&state, &tunnel_id, &parts.headers) {
        return status_page(StatusCode::FORBIDDEN, "Access denied");
    }

    let Some(control) = state.broker.control(&tunnel_id) else {
        return status_page(StatusCode::BAD_GATEWAY, "Tunnel owner not connected");
    };
    if !control.is_open() {
        return status_page(StatusCode::BAD_GATEWAY, "Tunnel owner not connected");
    }

    let connection_id = Uuid::new_v4().to_string();
    let full_path = match uri.query() {
        Some(q) => format!("{forward_path}?{q}"),
        None => forward_path.to_string(),
    };

    // The waiter is registered before the open message goes out; a client
    // dialing back instantly still finds it
    let pending = state.broker.request_data_connection(
        &tunnel_id,
        &connection_id,
        state.config.data_connection_timeout,
    );

    if is_websocket_upgrade(&parts.headers) {
        let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => ws,
            Err(rejection) => return rejection.into_response(),
        };

        if control
            .send(ControlMessage::open_websocket(
                connection_id.as_str(),
                full_path,
            ))
            .is_err()
        {
            return status_page(StatusCode::BAD_GATEWAY, "Tunnel owner not connected");
        }
        debug!(tunnel_id, connection_id, "Proxying websocket upgrade");

        // The 101 is committed before the data connection arrives; if it
        // never does, the fresh socket is closed immediately
        ws.on_upgrade(move |mut caller| async move {
            match pending.wait().await {
                Some(data) => bridge::bridge(caller, data).await,
                None => {
                    warn!("Data connection never arrived for websocket bridge");
                    let _ = caller.send(Message::Close(None)).await;
                }
            }
        })
    } else {
        if control
            .send(ControlMessage::open_http(connection_id.as_str()))
            .is_err()
        {
            return status_page(StatusCode::BAD_GATEWAY, "Tunnel owner not connected");
        }
        debug!(tunnel_id, connection_id, "Proxying http request");
        proxy_http(&tunnel_id, &full_path, parts, body, pending).await
    }
}

/// Run one framed HTTP exchange over a fresh data connection
async fn proxy_http(
    tunnel_id: &str,
    full_path: &str,
    parts: Parts,
    body: Body,
    pending: PendingDataRequest<WebSocket>,
) -> Response {
    let body = match to_bytes(body, MAX_FRAME_SIZE).await {
        Ok(body) => body,
        Err(err) => {
            warn!(tunnel_id, %err, "Rejected oversized or unreadable request body");
            return status_page(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let Some(mut data) = pending.wait().await else {
        warn!(tunnel_id, "Timed out waiting for a data connection");
        return status_page(StatusCode::GATEWAY_TIMEOUT, "Tunnel timed out");
    };

    let head = RequestHead::new(
        parts.method.as_str(),
        full_path,
        forwardable_request_headers(&parts.headers, tunnel_id),
        body.len(),
    );
    let frame = encode_request(&head, &body);
    if data.send(Message::Binary(frame.into())).await.is_err() {
        return status_page(StatusCode::BAD_GATEWAY, "Tunnel owner not connected");
    }

    // One binary frame carries the whole response; control frames in
    // between are tolerated
    let payload = loop {
        match data.recv().await {
            Some(Ok(Message::Binary(payload))) => break Some(payload),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) | Some(Err(_)) | None => break None,
        }
    };
    let _ = data.send(Message::Close(None)).await;

    let Some(payload) = payload else {
        warn!(tunnel_id, "Data connection closed before a response frame");
        return status_page(StatusCode::BAD_GATEWAY, "Tunnel returned no response");
    };

    let (head, resp_body) = match decode_response(&payload[..]) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(tunnel_id, %err, "Malformed response frame");
            return status_page(StatusCode::BAD_GATEWAY, "Tunnel returned a malformed response");
        }
    };

    let status = StatusCode::from_u16(head.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &head.headers {
        if !is_forwardable_response_header(name) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            continue;
        };
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(resp_body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Validate the one-time token, set the session cookie, redirect token-free
fn exchange_token(
    state: &GatewayState,
    tunnel_id: &str,
    path: &str,
    query: &str,
    token: &str,
    req_headers: &HeaderMap,
) -> Response {
    let claim = match state.signer.validate(token, state.registry.as_ref()) {
        Ok(claim) if claim.tunnel_id == tunnel_id => claim,
        Ok(_) => {
            warn!(tunnel_id, "Access token signed for a different tunnel");
            return status_page(StatusCode::FORBIDDEN, "Access denied");
        }
        Err(err) => {
            warn!(tunnel_id, %err, "Access token rejected");
            return status_page(StatusCode::FORBIDDEN, "Access denied");
        }
    };

    let cookie_token = state
        .signer
        .sign(tunnel_id, &claim.user_id, state.config.session_cookie_ttl);
    let secure = state.config.secure_cookies || is_https(req_headers);
    let set_cookie = headers::session_cookie(
        tunnel_id,
        &cookie_token,
        state.config.session_cookie_ttl.num_seconds(),
        secure,
    );

    let location = match headers::strip_token_query(query) {
        Some(remaining) => format!("{path}?{remaining}"),
        None => path.to_string(),
    };
    debug!(tunnel_id, user_id = %claim.user_id, "Exchanged access token for session cookie");

    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::SET_COOKIE, set_cookie)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Whether the request carries a valid session cookie for this tunnel
fn session_cookie_valid(state: &GatewayState, tunnel_id: &str, req_headers: &HeaderMap) -> bool {
    req_headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| headers::cookie_value(header, &cookie_name(tunnel_id)))
        .and_then(|cookie| state.signer.validate(&cookie, state.registry.as_ref()).ok())
        .map(|claim| claim.tunnel_id == tunnel_id)
        .unwrap_or(false)
}

/// Split `/tunnel/{id}{rest}` into the tunnel id and the forwarded path
fn split_tunnel_path(path: &str) -> Option<(&str, &str)> {
    let remainder = path.strip_prefix("/tunnel/")?;
    let (tunnel_id, rest) = match remainder.find('/') {
        Some(i) => (&remainder[..i], &remainder[i..]),
        None => (remainder, ""),
    };
    if tunnel_id.is_empty() {
        return None;
    }
    let forward_path = if rest.is_empty() { "/" } else { rest };
    Some((tunnel_id, forward_path))
}

/// Request headers suitable for forwarding, with the gateway's own session
/// cookie stripped out of `Cookie`
fn forwardable_request_headers(req_headers: &HeaderMap, tunnel_id: &str) -> Vec<(String, String)> {
    let own_cookie = cookie_name(tunnel_id);
    let mut forwarded = Vec::new();
    for (name, value) in req_headers {
        let Ok(value) = value.to_str() else { continue };
        let name = name.as_str();
        if !is_forwardable_request_header(name) {
            continue;
        }
        if name.eq_ignore_ascii_case("cookie") {
            if let Some(remaining) = headers::strip_cookie(value, &own_cookie) {
                forwarded.push(("cookie".to_string(), remaining));
            }
            continue;
        }
        forwarded.push((name.to_string(), value.to_string()));
    }
    forwarded
}

/// Whether the request asks for a WebSocket upgrade
///
/// The upgrade itself (version, key, method checks) is left to
/// `WebSocketUpgrade::from_request_parts`; this only routes the dispatch.
fn is_websocket_upgrade(req_headers: &HeaderMap) -> bool {
    req_headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn is_https(req_headers: &HeaderMap) -> bool {
    req_headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// Small HTML error page in the gateway's own voice
fn status_page(status: StatusCode, message: &str) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n\
         <body><h1>{code} {reason}</h1><p>{message}</p></body>\n</html>\n",
        code = status.as_u16(),
    );
    (status, Html(body)).into_response()
}
