//! Headless reverse-tunnel agent CLI entrypoint.
//!
//! The teacher shipped a Tauri desktop app with a React frontend driving an
//! identical `run_agent_loop`; the GUI and its IPC commands are out of scope
//! here, so this binary is the loop on its own: parse config, run the
//! supervisor, and log the event stream the supervisor emits in place of
//! the desktop UI's `app_handle.emit` calls.

use clap::Parser;
use client_lib::config::Config;
use client_lib::events::{self, AgentEvent};
use client_lib::supervisor;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_client=info".into()),
        )
        .init();

    let config = Arc::new(Config::parse());
    let (tx, mut rx) = events::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor_config = config.clone();
    let supervisor_handle = tokio::spawn(async move {
        supervisor::run(supervisor_config, tx, shutdown_rx).await;
    });

    let log_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(event);
        }
    });

    tokio::select! {
        _ = supervisor_handle => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, closing session");
            let _ = shutdown_tx.send(true);
        }
    }

    log_handle.abort();
    Ok(())
}

fn log_event(event: AgentEvent) {
    match event {
        AgentEvent::Connecting { server_addr } => info!(%server_addr, "connecting"),
        AgentEvent::Authenticating => info!("authenticating"),
        AgentEvent::Online { tunnels, reconnect_count } => {
            for tunnel in &tunnels {
                info!(
                    subdomain = %tunnel.subdomain,
                    local_port = tunnel.local_port,
                    reconnect_count,
                    "tunnel online at {}",
                    tunnel.public_url
                );
            }
        }
        AgentEvent::Disconnected { reason } => warn!(%reason, "disconnected, will retry"),
        AgentEvent::Rejected { reason } => warn!(%reason, "registration rejected, giving up"),
        AgentEvent::RequestHandled { subdomain, status } => {
            tracing::debug!(%subdomain, status, "request handled")
        }
        AgentEvent::RequestFailed { subdomain, reason } => {
            warn!(%subdomain, %reason, "request failed")
        }
    }
}
