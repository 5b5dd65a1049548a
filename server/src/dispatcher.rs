//! Public HTTP dispatcher (spec.md §4.5).
//!
//! The teacher served one route, `/ws`, to which every client spoke the same
//! protocol. Here the public listener serves arbitrary inbound HTTP for
//! arbitrary hosts, so the routing generalizes to axum's fallback handler
//! doing subdomain extraction, session lookup, and a frame exchange over a
//! freshly opened mux stream — axum itself is unchanged from the teacher's
//! choice of web framework.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tunnel_protocol::{Base64Body, Frame};
use uuid::Uuid;

use crate::framing::{read_frame, write_frame};
use crate::session::Session;
use crate::state::AppState;

const WRITE_DEADLINE: Duration = Duration::from_secs(10);

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Catch-all handler mounted as the router's fallback — spec.md describes no
/// other routes on the public listener, so every request (any host, any
/// method, any path) lands here.
pub async fn handle(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Response {
    // `ConnectInfo` is populated by `axum::serve`'s `into_make_service_with_connect_info`
    // (plain HTTP) or inserted manually per-connection (HTTPS, see public_listener.rs).
    // It's absent under axum-test's mock transport; fall back to attributing nothing.
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let Some(host) = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::NOT_FOUND, "missing Host header").into_response();
    };

    let Some(subdomain) = extract_subdomain(host, &state.config.base_domain) else {
        return (StatusCode::NOT_FOUND, "unknown host").into_response();
    };

    let mut session = state.registry.lookup(&subdomain);
    if let Some(s) = &session {
        if s.is_closed() {
            // the session may have died between lookup and use; retry once.
            session = state.registry.lookup(&subdomain);
        }
    }
    let Some(session) = session.filter(|s| !s.is_closed()) else {
        return (
            StatusCode::BAD_GATEWAY,
            "tunnel not connected",
        )
            .into_response();
    };

    if is_websocket_upgrade(req.headers()) {
        return handle_upgrade(session, req, &state, &subdomain, remote_addr).await;
    }

    handle_standard(session, req, &state, &subdomain, remote_addr).await
}

async fn handle_standard(
    session: Arc<Session>,
    req: Request<Body>,
    state: &AppState,
    subdomain: &str,
    remote_addr: Option<SocketAddr>,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = attribute_client_ip(
        strip_hop_by_hop(req.headers()),
        remote_addr,
        &state.trusted_proxies,
    );

    let body_bytes = match to_bytes(req.into_body(), state.config.max_request_body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let correlation_id = Uuid::new_v4().to_string();
    let mut stream = match timeout(WRITE_DEADLINE, session.open_stream()).await {
        Ok(Ok(stream)) => stream,
        _ => return (StatusCode::BAD_GATEWAY, "tunnel not connected").into_response(),
    };

    let request_body_len = body_bytes.len() as u64;
    let request_frame = Frame::RequestFrame {
        id: correlation_id,
        subdomain: subdomain.to_string(),
        method,
        path,
        headers,
        body: Base64Body(body_bytes.to_vec()),
    };

    if timeout(WRITE_DEADLINE, write_frame(&mut stream, &request_frame))
        .await
        .is_err()
    {
        return (StatusCode::BAD_GATEWAY, "failed writing request to tunnel").into_response();
    }

    let response_frame = match timeout(state.config.request_timeout(), read_frame(&mut stream)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => return (StatusCode::BAD_GATEWAY, "failed reading tunnel response").into_response(),
        Err(_) => return (StatusCode::GATEWAY_TIMEOUT, "tunnel response timed out").into_response(),
    };
    let _ = stream.shutdown().await;

    match response_frame {
        Frame::ResponseFrame {
            status,
            headers,
            body,
            ..
        } => {
            // bytesReceived/bytesSent are from the public caller's point of
            // view (spec.md §4.5 step 5): received is the request body we
            // read from them, sent is the response body we write back.
            session
                .counters
                .bytes_received
                .fetch_add(request_body_len, std::sync::atomic::Ordering::Relaxed);
            session
                .counters
                .bytes_sent
                .fetch_add(body.0.len() as u64, std::sync::atomic::Ordering::Relaxed);
            session
                .counters
                .request_count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            build_response(status, &headers, body)
        }
        _ => (StatusCode::BAD_GATEWAY, "unexpected frame from tunnel").into_response(),
    }
}

async fn handle_upgrade(
    session: Arc<Session>,
    mut req: Request<Body>,
    state: &AppState,
    subdomain: &str,
    remote_addr: Option<SocketAddr>,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    // the upgrade tuple is preserved verbatim aside from client-IP attribution.
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let headers = attribute_client_ip(headers, remote_addr, &state.trusted_proxies);

    let upgrade_fut = hyper::upgrade::on(&mut req);

    let body_bytes = match to_bytes(req.into_body(), state.config.max_request_body).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };

    let mut stream = match timeout(WRITE_DEADLINE, session.open_stream()).await {
        Ok(Ok(stream)) => stream,
        _ => return (StatusCode::BAD_GATEWAY, "tunnel not connected").into_response(),
    };

    let request_frame = Frame::RequestFrame {
        id: Uuid::new_v4().to_string(),
        subdomain: subdomain.to_string(),
        method,
        path,
        headers,
        body: Base64Body(body_bytes.to_vec()),
    };

    if timeout(WRITE_DEADLINE, write_frame(&mut stream, &request_frame))
        .await
        .is_err()
    {
        return (StatusCode::BAD_GATEWAY, "failed writing upgrade request").into_response();
    }

    let response_frame = match timeout(state.config.request_timeout(), read_frame(&mut stream)).await {
        Ok(Ok(frame)) => frame,
        _ => return (StatusCode::BAD_GATEWAY, "failed reading tunnel response").into_response(),
    };

    let (status, headers) = match response_frame {
        Frame::ResponseFrame { status, headers, .. } => (status, headers),
        _ => return (StatusCode::BAD_GATEWAY, "unexpected frame from tunnel").into_response(),
    };

    if status != 101 {
        let _ = stream.shutdown().await;
        return build_response(status, &headers, Base64Body(Vec::new()));
    }

    let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            builder = builder.header(name, value);
        }
    }
    let response = builder.body(Body::empty()).unwrap_or_else(|_| {
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .body(Body::empty())
            .unwrap()
    });

    tokio::spawn(async move {
        match upgrade_fut.await {
            Ok(upgraded) => {
                let mut public = TokioIo::new(upgraded);
                match tokio::io::copy_bidirectional(&mut public, &mut stream).await {
                    Ok((to_tunnel, from_tunnel)) => {
                        session
                            .counters
                            .bytes_received
                            .fetch_add(to_tunnel, std::sync::atomic::Ordering::Relaxed);
                        session
                            .counters
                            .bytes_sent
                            .fetch_add(from_tunnel, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(err) => tracing::debug!(error = %err, "websocket byte-pipe ended"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "public connection upgrade failed"),
        }
    });

    response
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_has_upgrade = headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let upgrade_is_websocket = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    connection_has_upgrade && upgrade_is_websocket
}

fn extract_subdomain(host: &str, base_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let suffix = format!(".{}", base_domain.to_ascii_lowercase());
    let label = host.strip_suffix(&suffix)?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label.to_string())
}

fn strip_hop_by_hop(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str().to_ascii_lowercase().as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Attributes a client IP onto the forwarded request per spec.md §6. If the
/// direct peer is in `trusted_proxies`, its `X-Forwarded-For`/`X-Real-IP`
/// are passed through untouched. Otherwise both are stripped and replaced
/// with the peer's own address, so an untrusted client can't spoof them.
fn attribute_client_ip(
    mut headers: Vec<(String, String)>,
    remote_addr: Option<SocketAddr>,
    trusted_proxies: &crate::trusted_proxy::TrustedProxies,
) -> Vec<(String, String)> {
    let Some(remote_addr) = remote_addr else {
        return headers;
    };
    if trusted_proxies.contains(remote_addr.ip()) {
        return headers;
    }
    headers.retain(|(name, _)| {
        !name.eq_ignore_ascii_case(FORWARDED_FOR) && !name.eq_ignore_ascii_case(REAL_IP)
    });
    let ip = remote_addr.ip().to_string();
    headers.push((FORWARDED_FOR.to_string(), ip.clone()));
    headers.push((REAL_IP.to_string(), ip));
    headers
}

fn build_response(status: u16, headers: &[(String, String)], body: Base64Body) -> Response {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(body.0))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
