//! # Tunnel Edge Server
//!
//! Terminates agent control connections (one TLS+yamux connection per
//! agent, carrying the registration handshake and per-request data streams)
//! and dispatches public HTTP/HTTPS traffic to whichever agent currently
//! owns the request's subdomain.
//!
//! `main.rs` is a thin CLI wrapper around the listener tasks defined here;
//! the modules are also exercised directly by integration tests in `tests/`.
//!
//! ## Modules
//!
//! - [`tunnel_protocol`] (external crate) — wire frames shared with the agent
//! - [`auth`]             — the `AuthCollaborator` boundary and its bundled `StaticTokenAuth`
//! - [`config`]           — CLI/env configuration
//! - [`transport`]        — TLS termination and yamux multiplexing
//! - [`registry`]         — the subdomain → session table
//! - [`session`]          — one agent's live tunnel session
//! - [`handshake`]        — the registration exchange (spec.md §4.3)
//! - [`keepalive`]        — per-session Ping/Pong liveness
//! - [`dispatcher`]       — the public HTTP/HTTPS request path (spec.md §4.5)
//! - [`public_listener`]  — binds the public HTTP/HTTPS ports
//! - [`admin_api`]        — session introspection/eviction (spec.md §6)
//! - [`trusted_proxy`]    — `X-Forwarded-For`/`X-Real-IP` trust list
//! - [`error`]            — the error taxonomy (spec.md §7)

pub mod admin_api;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod keepalive;
pub mod public_listener;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;
pub mod trusted_proxy;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;
use crate::transport::MuxConnection;

/// Accepts agent connections on the tunnel (control-plane) port: terminates
/// TLS, brings up the multiplexer, runs the registration handshake, and on
/// success spawns the keepalive task that owns the session going forward.
pub async fn run_tunnel_listener(
    config: Arc<Config>,
    state: AppState,
    tls_acceptor: tokio_rustls::TlsAcceptor,
) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.tunnel_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tunnel listener bound");

    loop {
        let (tcp_stream, remote_addr) = listener.accept().await?;
        if let Err(err) = tcp_stream.set_nodelay(true) {
            warn!(%remote_addr, error = %err, "failed to set TCP_NODELAY");
        }

        if state.registry.all_sessions().len() >= config.max_sessions {
            warn!(%remote_addr, "rejecting connection, max_sessions reached");
            continue;
        }

        let tls_acceptor = tls_acceptor.clone();
        let state = state.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%remote_addr, error = %err, "tunnel TLS handshake failed");
                    return;
                }
            };
            let mux = MuxConnection::new(tls_stream, remote_addr);
            match handshake::perform(mux, remote_addr, &state.registry, state.auth.as_ref(), &config).await {
                Ok(Some(session)) => {
                    tokio::spawn(keepalive::run(session, state.registry.clone(), state.auth.clone()));
                }
                Ok(None) => {}
                Err(err) => warn!(%remote_addr, error = %err, "registration handshake failed"),
            }
        });
    }
}

pub async fn run_admin_api(config: Arc<Config>, state: AppState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/sessions", get(admin_api::list_sessions))
        .route("/api/sessions/{id}/evict", post(admin_api::evict_session))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.admin_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "admin API listener bound");
    axum::serve(listener, app).await?;
    Ok(())
}
