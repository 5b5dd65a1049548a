//! Server-side registration handshake (spec.md §4.3): the exchange that
//! turns a freshly-dialed mux connection into a registered `Session`.
//!
//! Grounded in the teacher's `handle_connection`/`handle_message`
//! (`handlers.rs`), which did registration inline on the first WebSocket
//! frame; here the equivalent work happens on the first stream of a mux
//! connection, with the atomic multi-forward bind spec.md requires instead
//! of the teacher's single-agent-id `DashMap::insert`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tunnel_protocol::{validate_auth_request, Frame, TunnelInfo};

use crate::auth::{AuthCollaborator, AuthErrorCode, SessionInfo, SubdomainScope};
use crate::config::Config;
use crate::registry::{BindOutcome, SubdomainRegistry};
use crate::session::Session;
use crate::transport::MuxConnection;

const AUTH_READ_DEADLINE: Duration = Duration::from_secs(10);

/// Fatal auth-error reasons, echoed verbatim in `AuthResponse.error`. Keeping
/// these as plain strings (rather than a shared wire enum) matches spec.md
/// §3's `AuthResponse { error: string? }` shape.
fn reason_for(code: AuthErrorCode) -> &'static str {
    match code {
        AuthErrorCode::InvalidToken => "invalid token",
        AuthErrorCode::Expired => "token expired",
        AuthErrorCode::IpNotAllowed => "ip not allowed",
        AuthErrorCode::QuotaExceeded => "quota exceeded",
        AuthErrorCode::AppNotFound => "application not found",
        AuthErrorCode::SubdomainReserved => "subdomain reserved",
    }
}

/// Runs the registration handshake on a just-accepted mux connection. On
/// success, the returned `Session` is already bound into `registry` and its
/// keepalive task has not yet been spawned — the caller (the tunnel
/// listener's accept loop) owns that, since it also owns the session's
/// lifetime once registered.
pub async fn perform(
    mux: MuxConnection,
    remote_addr: SocketAddr,
    registry: &SubdomainRegistry,
    auth: &dyn AuthCollaborator,
    config: &Config,
) -> anyhow::Result<Option<Arc<Session>>> {
    let mut auth_stream = match timeout(AUTH_READ_DEADLINE, mux.accept_stream()).await {
        Ok(Some(stream)) => stream,
        Ok(None) => {
            tracing::debug!(%remote_addr, "mux connection closed before auth stream arrived");
            return Ok(None);
        }
        Err(_) => {
            tracing::warn!(%remote_addr, "auth stream did not arrive within 10s");
            return Ok(None);
        }
    };

    let frame = match read_frame(&mut auth_stream, AUTH_READ_DEADLINE).await {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(%remote_addr, error = %err, "failed to read AuthRequest");
            return Ok(None);
        }
    };

    let (token, forwards, app_id) = match frame {
        Frame::AuthRequest {
            token,
            forwards,
            app_id,
        } => (token, forwards, app_id),
        other => {
            reject(&mut auth_stream, &format!("expected AuthRequest, got {}", other.kind())).await;
            return Ok(None);
        }
    };

    // 1. Shape validation (spec.md §3, P5).
    if let Err(err) = validate_auth_request(&token, &forwards) {
        reject(&mut auth_stream, &err.to_string()).await;
        return Ok(None);
    }

    // 2. Resolve identity via the auth collaborator.
    let identity = match auth.resolve_token(&token, app_id.as_deref(), remote_addr).await {
        Ok(identity) => identity,
        Err(code) => {
            reject(&mut auth_stream, reason_for(code)).await;
            return Ok(None);
        }
    };

    // App-bound identities may register at most one forward.
    if matches!(identity.scope, SubdomainScope::AppBound(_)) && forwards.len() > 1 {
        reject(&mut auth_stream, "application-bound token permits only one forward").await;
        return Ok(None);
    }

    // 3. Per-forward policy admission.
    for forward in &forwards {
        if !identity.scope.permits(&forward.subdomain) {
            reject(&mut auth_stream, "subdomain reserved").await;
            return Ok(None);
        }
    }

    let session = Arc::new(Session::new(identity.clone(), forwards.clone(), mux, remote_addr));

    // 4. Atomic multi-forward bind; on conflict nothing was claimed (registry.rs).
    match registry.try_bind_all(session.clone()).await {
        BindOutcome::Ok => {}
        BindOutcome::Conflict(subdomain) => {
            reject(&mut auth_stream, &format!("subdomain already in use: {subdomain}")).await;
            return Ok(None);
        }
    }

    // 5. Success response.
    let tunnels: Vec<TunnelInfo> = forwards
        .iter()
        .map(|f| TunnelInfo {
            subdomain: f.subdomain.clone(),
            public_url: public_url(config, &f.subdomain),
            local_port: f.local_port,
        })
        .collect();

    let response = Frame::AuthResponse {
        success: true,
        tunnels: Some(tunnels),
        error: None,
    };
    if write_frame(&mut auth_stream, &response).await.is_err() {
        registry.unbind_all(&session).await;
        return Ok(None);
    }
    let _ = auth_stream.shutdown().await;

    auth.on_session_open(&SessionInfo {
        session_id: session.id.clone(),
        account_id: session.identity.account_id.clone(),
        org_id: session.identity.org_id.clone(),
        remote_addr,
        subdomains: session.subdomains(),
    })
    .await;

    Ok(Some(session))
}

fn public_url(config: &Config, subdomain: &str) -> String {
    let port_suffix = match (config.public_scheme.as_str(), config.public_https_port, config.public_http_port) {
        ("https", Some(443), _) => String::new(),
        ("https", Some(port), _) => format!(":{port}"),
        ("http", _, 80) => String::new(),
        ("http", _, port) => format!(":{port}"),
        _ => String::new(),
    };
    format!(
        "{}://{}.{}{}",
        config.public_scheme, subdomain, config.base_domain, port_suffix
    )
}

async fn reject(stream: &mut crate::transport::MuxStream, reason: &str) {
    let response = Frame::AuthResponse {
        success: false,
        tunnels: None,
        error: Some(reason.to_string()),
    };
    let _ = write_frame(stream, &response).await;
    let _ = stream.shutdown().await;
}

async fn read_frame(
    stream: &mut crate::transport::MuxStream,
    deadline: Duration,
) -> anyhow::Result<Frame> {
    timeout(deadline, crate::framing::read_frame(stream))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
}

async fn write_frame(stream: &mut crate::transport::MuxStream, frame: &Frame) -> anyhow::Result<()> {
    crate::framing::write_frame(stream, frame).await
}
