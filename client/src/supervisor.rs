//! Reconnect supervisor (spec.md §4.7).
//!
//! State machine: `CONNECTING → AUTHENTICATING → ONLINE → (DISCONNECTED |
//! REJECTED)`, `DISCONNECTED → CONNECTING` after backoff, `REJECTED`
//! terminal. Grounded in the teacher's `run_agent_loop` (`agent.rs`) for the
//! "loop forever, reconnect after a delay" shape, generalized from its fixed
//! 3-second delay into the exponential-backoff-with-cap spec.md requires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tunnel_protocol::ForwardConfig;

use crate::config::{Config, ForwardArg};
use crate::events::{AgentEvent, EventSender, TunnelSummary};
use crate::forwarder;
use crate::handshake;
use crate::transport::MuxConnection;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn to_forward_configs(args: &[ForwardArg]) -> Vec<ForwardConfig> {
    args.iter()
        .map(|a| ForwardConfig {
            subdomain: a.subdomain.clone(),
            local_port: a.local_port,
            local_https: a.local_https,
            primary: a.primary,
        })
        .collect()
}

/// Runs the supervisor loop until either a fatal rejection occurs or
/// `shutdown` fires. Never returns `Err` for transient failures — those are
/// retried internally with backoff.
pub async fn run(config: Arc<Config>, events: EventSender, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let forwards = to_forward_configs(&config.forwards);
    let forward_map: Arc<HashMap<String, ForwardConfig>> = Arc::new(
        forwards
            .iter()
            .map(|f| (f.subdomain.clone(), f.clone()))
            .collect(),
    );

    let mut backoff = INITIAL_BACKOFF;
    // Counts successful reconnects, i.e. every `Online` after the first;
    // spec.md §8 scenario 6 checks this increments by 1 per kill-reconnect
    // cycle. Shared with `attempt` by `&mut` so it only ticks once the
    // handshake actually completes, not on every dial attempt.
    let mut reconnect_count: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let _ = events
            .send(AgentEvent::Connecting {
                server_addr: config.server_addr.clone(),
            })
            .await;

        match attempt(
            &config,
            &forwards,
            forward_map.clone(),
            &events,
            &mut shutdown,
            &mut reconnect_count,
            &mut backoff,
        )
        .await
        {
            Attempt::Rejected(reason) => {
                let _ = events.send(AgentEvent::Rejected { reason }).await;
                return;
            }
            Attempt::ShuttingDown => return,
            Attempt::Transient(reason) => {
                let _ = events
                    .send(AgentEvent::Disconnected { reason })
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

enum Attempt {
    Transient(String),
    Rejected(String),
    ShuttingDown,
}

async fn attempt(
    config: &Arc<Config>,
    forwards: &[ForwardConfig],
    forward_map: Arc<HashMap<String, ForwardConfig>>,
    events: &EventSender,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
    reconnect_count: &mut u32,
    backoff: &mut Duration,
) -> Attempt {
    let mux = match MuxConnection::dial(config).await {
        Ok(mux) => Arc::new(mux),
        Err(err) => return Attempt::Transient(err.to_string()),
    };

    let _ = events.send(AgentEvent::Authenticating).await;

    let registered = match handshake::register(&mux, config, forwards.to_vec()).await {
        Ok(registered) => registered,
        Err(err) => {
            let reason = err.to_string();
            mux.close().await;
            if handshake::is_fatal_reason(&reason) {
                return Attempt::Rejected(reason);
            }
            return Attempt::Transient(reason);
        }
    };

    let tunnels: Vec<TunnelSummary> = registered
        .tunnels
        .iter()
        .map(|t| TunnelSummary {
            subdomain: t.subdomain.clone(),
            public_url: t.public_url.clone(),
            local_port: t.local_port,
        })
        .collect();
    let _ = events
        .send(AgentEvent::Online {
            tunnels,
            reconnect_count: *reconnect_count,
        })
        .await;
    *reconnect_count += 1;
    // spec.md §4.7: backoff resets to its initial value on a successful ONLINE.
    *backoff = INITIAL_BACKOFF;

    let forwarder_events = events.clone();
    let forwarder_mux = mux.clone();
    let forwarder_map = forward_map.clone();
    let forwarder_config = config.clone();
    let forwarder_task = tokio::spawn(async move {
        forwarder::run(forwarder_mux, forwarder_map, forwarder_config, forwarder_events).await;
    });

    tokio::select! {
        _ = forwarder_task => Attempt::Transient("mux connection closed".to_string()),
        _ = shutdown.changed() => {
            mux.close().await;
            Attempt::ShuttingDown
        }
    }
}
