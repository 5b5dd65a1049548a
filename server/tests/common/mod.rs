//! Shared test harness for the tunnel integration tests.
//!
//! Spins up the real control-plane pipeline (TCP accept → TLS → yamux →
//! registration handshake → keepalive) on an ephemeral loopback port and
//! dials it with the real agent library (`client_lib`), so these tests
//! exercise the actual wire protocol instead of a faked-out registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use client_lib::config::{Config as ClientConfig, ForwardArg};
use client_lib::events::{self, EventReceiver};
use client_lib::transport::MuxConnection as ClientMux;
use client_lib::{forwarder, handshake as client_handshake};
use tunnel_protocol::{ForwardConfig, TunnelInfo};
use tunnel_server::auth::StaticTokenAuth;
use tunnel_server::config::Config as ServerConfig;
use tunnel_server::state::AppState;
use tunnel_server::transport::MuxConnection as ServerMux;
use tunnel_server::trusted_proxy::TrustedProxies;
use tunnel_server::{handshake as server_handshake, keepalive};

#[allow(dead_code)]
pub fn write_tokens_file(json: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let path = std::env::temp_dir().join(format!(
        "tunnel-test-tokens-{}-{nanos}.json",
        std::process::id()
    ));
    std::fs::write(&path, json).unwrap();
    path
}

#[allow(dead_code)]
pub fn server_config(tokens_path: PathBuf) -> ServerConfig {
    ServerConfig {
        base_domain: "example.com".to_string(),
        tunnel_port: 0,
        public_http_port: 0,
        public_https_port: None,
        public_scheme: "https".to_string(),
        tunnel_tls_cert: None,
        tunnel_tls_key: None,
        trusted_proxies: Vec::new(),
        request_timeout_secs: 5,
        max_request_body: 1024 * 1024,
        admin_port: 0,
        auth_tokens_file: Some(tokens_path),
        max_sessions: 16,
    }
}

#[allow(dead_code)]
pub fn test_state(tokens_path: PathBuf) -> AppState {
    let config = server_config(tokens_path);
    let auth = StaticTokenAuth::load_from_file(config.auth_tokens_file.as_ref().unwrap()).unwrap();
    AppState::new(Arc::new(auth), Arc::new(config), TrustedProxies::default())
}

/// Binds the control-plane listener to an ephemeral port and runs the same
/// accept → TLS → mux → handshake → keepalive pipeline `main.rs` runs,
/// scoped to this test's lifetime (the spawned task is dropped with the
/// test's runtime).
#[allow(dead_code)]
pub async fn spawn_tunnel_listener(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tls_acceptor = tunnel_server::transport::build_tls_acceptor(&state.config).unwrap();

    tokio::spawn(async move {
        loop {
            let (tcp_stream, remote_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let _ = tcp_stream.set_nodelay(true);
            let tls_acceptor = tls_acceptor.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mux = ServerMux::new(tls_stream, remote_addr);
                if let Ok(Some(session)) = server_handshake::perform(
                    mux,
                    remote_addr,
                    &state.registry,
                    state.auth.as_ref(),
                    &state.config,
                )
                .await
                {
                    tokio::spawn(keepalive::run(session, state.registry.clone(), state.auth.clone()));
                }
            });
        }
    });

    addr
}

/// Spawns a bare-bones HTTP/1.1 server on loopback that answers every
/// request with a fixed status/body, standing in for "the local service".
#[allow(dead_code)]
pub async fn spawn_fixed_response_server(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

#[allow(dead_code)]
pub struct Agent {
    pub mux: Arc<ClientMux>,
    pub tunnels: Vec<TunnelInfo>,
    pub events: EventReceiver,
}

/// Dials `server_addr`, runs the registration handshake, and (on success)
/// spawns the client-side forwarder loop. Mirrors one pass of
/// `supervisor::attempt` without the reconnect loop around it.
#[allow(dead_code)]
pub async fn dial_and_register(
    server_addr: SocketAddr,
    token: &str,
    forward_args: Vec<ForwardArg>,
) -> anyhow::Result<Agent> {
    let forwards: Vec<ForwardConfig> = forward_args
        .iter()
        .map(|a| ForwardConfig {
            subdomain: a.subdomain.clone(),
            local_port: a.local_port,
            local_https: a.local_https,
            primary: a.primary,
        })
        .collect();
    let forward_map: Arc<HashMap<String, ForwardConfig>> = Arc::new(
        forwards
            .iter()
            .map(|f| (f.subdomain.clone(), f.clone()))
            .collect(),
    );

    let config = Arc::new(ClientConfig {
        server_addr: server_addr.to_string(),
        server_name: Some("127.0.0.1".to_string()),
        token: token.to_string(),
        app_id: None,
        forwards: forward_args,
        insecure_skip_verify: true,
        local_insecure_skip_verify: false,
    });

    let mux = Arc::new(ClientMux::dial(&config).await?);
    let registered = client_handshake::register(&mux, &config, forwards).await?;

    let (tx, rx) = events::channel();
    let forwarder_mux = mux.clone();
    tokio::spawn(async move {
        forwarder::run(forwarder_mux, forward_map, config, tx).await;
    });

    Ok(Agent {
        mux,
        tunnels: registered.tunnels,
        events: rx,
    })
}
