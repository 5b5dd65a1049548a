//! End-to-end scenarios from spec.md §8: a real agent dials a real tunnel
//! listener over TCP+TLS+yamux, registers forwards, and public requests are
//! dispatched through the resulting session. Covers scenarios 1, 2, 3, 4, 5.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum_test::TestServer;
use client_lib::config::{Config as ClientConfig, ForwardArg};
use client_lib::events::{self, AgentEvent};
use client_lib::supervisor;

use common::{dial_and_register, spawn_fixed_response_server, spawn_tunnel_listener, test_state, write_tokens_file};
use tunnel_server::keepalive;
use tunnel_server::public_listener::router;

fn forward(subdomain: &str, port: u16, primary: bool) -> ForwardArg {
    ForwardArg {
        subdomain: subdomain.to_string(),
        local_port: port,
        local_https: false,
        primary,
    }
}

/// Scenario 1: single forward round trip.
#[tokio::test]
async fn single_forward_round_trip() {
    let tokens = write_tokens_file(r#"{"tok": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#);
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;
    let local_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", r#"{"hello":"world"}"#).await;

    let agent = dial_and_register(tunnel_addr, "tok", vec![forward("app", local_addr.port(), true)])
        .await
        .expect("registration should succeed");
    assert_eq!(agent.tunnels.len(), 1);
    assert_eq!(agent.tunnels[0].subdomain, "app");

    let server = TestServer::new(router(state.clone())).unwrap();
    let resp = server.get("/").add_header(header::HOST, "app.example.com").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["hello"], "world");
}

/// Scenario 2: multi-forward, with the session byte counters reflecting
/// both requests.
#[tokio::test]
async fn multi_forward_updates_session_counters() {
    let tokens = write_tokens_file(r#"{"tok": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#);
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;

    let frontend_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", "frontend-body").await;
    let api_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", "ok").await;

    let agent = dial_and_register(
        tunnel_addr,
        "tok",
        vec![
            forward("frontend", frontend_addr.port(), true),
            forward("api", api_addr.port(), false),
        ],
    )
    .await
    .expect("registration should succeed");
    assert_eq!(agent.tunnels.len(), 2);

    let server = TestServer::new(router(state.clone())).unwrap();

    let resp = server
        .put("/")
        .add_header(header::HOST, "frontend.example.com")
        .bytes("frontend-request".into())
        .await;
    resp.assert_status(StatusCode::OK);

    let resp = server
        .put("/health")
        .add_header(header::HOST, "api.example.com")
        .bytes("ar".into())
        .await;
    resp.assert_status(StatusCode::OK);

    let session = state
        .registry
        .lookup("frontend")
        .expect("frontend session should be registered");
    assert_eq!(session.counters.request_count.load(Ordering::Relaxed), 2);
    let received = session.counters.bytes_received.load(Ordering::Relaxed);
    assert_eq!(received, "frontend-request".len() as u64 + "ar".len() as u64);
    let sent = session.counters.bytes_sent.load(Ordering::Relaxed);
    assert_eq!(sent, "frontend-body".len() as u64 + "ok".len() as u64);
}

/// Scenario 3: rejection. An invalid token never binds a subdomain and the
/// client sees a fatal (non-retriable) reason.
#[tokio::test]
async fn invalid_token_is_rejected() {
    let tokens = write_tokens_file(r#"{"tok": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#);
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;

    let err = dial_and_register(tunnel_addr, "bad-token", vec![forward("app", 3000, true)])
        .await
        .unwrap_err();
    let reason = err.to_string();
    assert!(reason.to_ascii_lowercase().contains("invalid token"));
    assert!(client_lib::handshake::is_fatal_reason(&reason));
    assert!(state.registry.lookup("app").is_none());
}

/// Scenario 4: upstream down. A forward pointing at nothing listening gets
/// a 502, and the session stays live for a second, working forward.
#[tokio::test]
async fn upstream_down_yields_bad_gateway_session_stays_live() {
    let tokens = write_tokens_file(r#"{"tok": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#);
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;
    let healthy_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", "ok").await;

    // A port nothing is listening on, in the loopback ephemeral range.
    let dead_port = {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };

    let agent = dial_and_register(
        tunnel_addr,
        "tok",
        vec![
            forward("app", dead_port, true),
            forward("healthy", healthy_addr.port(), false),
        ],
    )
    .await
    .expect("registration should succeed");
    assert_eq!(agent.tunnels.len(), 2);

    let server = TestServer::new(router(state.clone())).unwrap();

    let resp = server.get("/").add_header(header::HOST, "app.example.com").await;
    resp.assert_status(StatusCode::BAD_GATEWAY);

    let resp = server.get("/").add_header(header::HOST, "healthy.example.com").await;
    resp.assert_status(StatusCode::OK);
}

/// Scenario 5: subdomain collision. The second client to request the same
/// subdomain is rejected; the first keeps serving.
#[tokio::test]
async fn colliding_subdomain_rejects_the_second_client() {
    let tokens = write_tokens_file(
        r#"{"tok-a": {"account_id":"acc-a","org_id":"org-a","wildcard":true},
            "tok-b": {"account_id":"acc-b","org_id":"org-b","wildcard":true}}"#,
    );
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;
    let local_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", "first").await;

    let first = dial_and_register(tunnel_addr, "tok-a", vec![forward("app", local_addr.port(), true)])
        .await
        .expect("first registration should succeed");
    assert_eq!(first.tunnels.len(), 1);

    let second_err = dial_and_register(tunnel_addr, "tok-b", vec![forward("app", 9999, true)])
        .await
        .unwrap_err();
    assert!(second_err.to_string().to_ascii_lowercase().contains("already in use"));

    let server = TestServer::new(router(state.clone())).unwrap();
    let resp = server.get("/").add_header(header::HOST, "app.example.com").await;
    resp.assert_status(StatusCode::OK);
    assert_eq!(resp.text(), "first");

    let _ = Arc::strong_count(&first.mux); // keep `first` alive until assertions complete
}

/// Scenario 6: reconnect. Killing the session server-side (the same path
/// admin eviction uses) drives the supervisor back through `CONNECTING` and
/// `AUTHENTICATING`; it re-registers the same subdomain and its exposed
/// `reconnect_count` increments by 1.
#[tokio::test]
async fn supervisor_reconnects_after_session_is_killed() {
    let tokens = write_tokens_file(r#"{"tok": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#);
    let state = test_state(tokens);
    let tunnel_addr = spawn_tunnel_listener(state.clone()).await;
    let local_addr = spawn_fixed_response_server("HTTP/1.1 200 OK", "hello").await;

    let config = Arc::new(ClientConfig {
        server_addr: tunnel_addr.to_string(),
        server_name: Some("127.0.0.1".to_string()),
        token: "tok".to_string(),
        app_id: None,
        forwards: vec![forward("app", local_addr.port(), true)],
        insecure_skip_verify: true,
        local_insecure_skip_verify: false,
    });

    let (tx, mut rx) = events::channel();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let supervisor_task = tokio::spawn(supervisor::run(config, tx, shutdown_rx));

    assert_eq!(next_reconnect_count(&mut rx).await, 0);

    let session = state
        .registry
        .lookup("app")
        .expect("session should be registered after the first connect");
    keepalive::shutdown(&session, &state.registry, state.auth.as_ref()).await;

    assert_eq!(next_reconnect_count(&mut rx).await, 1);

    supervisor_task.abort();
}

async fn next_reconnect_count(rx: &mut events::EventReceiver) -> u32 {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for an Online event")
            .expect("event channel closed before seeing Online");
        if let AgentEvent::Online { reconnect_count, .. } = event {
            return reconnect_count;
        }
    }
}
