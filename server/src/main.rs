//! Tunnel edge server CLI entrypoint. Parses configuration, loads the
//! bundled `StaticTokenAuth` collaborator, and runs the tunnel listener,
//! public HTTP/HTTPS listeners, and admin API concurrently until one of
//! them exits.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};

use tunnel_server::auth::{AuthCollaborator, StaticTokenAuth};
use tunnel_server::config::Config;
use tunnel_server::state::AppState;
use tunnel_server::trusted_proxy::TrustedProxies;
use tunnel_server::{public_listener, transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_server=info".into()),
        )
        .init();

    let config = Config::parse();

    let auth: Arc<dyn AuthCollaborator> = match &config.auth_tokens_file {
        Some(path) => Arc::new(StaticTokenAuth::load_from_file(path)?),
        None => {
            warn!("no AUTH_TOKENS_FILE configured; every token will be rejected as invalid");
            Arc::new(StaticTokenAuth::empty())
        }
    };

    let trusted_proxies = TrustedProxies::parse(&config.trusted_proxies)?;
    let config = Arc::new(config);
    let state = AppState::new(auth, config.clone(), trusted_proxies);

    let tls_acceptor = transport::build_tls_acceptor(&config)?;

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(tunnel_server::run_tunnel_listener(
        config.clone(),
        state.clone(),
        tls_acceptor,
    ));

    let public_app = public_listener::router(state.clone());
    tasks.spawn(public_listener::serve_http(public_app.clone(), config.public_http_port));

    if let Some(https_port) = config.public_https_port {
        let https_acceptor = public_listener::tls_acceptor_for(&config)?
            .expect("public_https_port implies a TLS acceptor");
        tasks.spawn(public_listener::serve_https(public_app, https_port, https_acceptor));
    }

    tasks.spawn(tunnel_server::run_admin_api(config.clone(), state.clone()));

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "a server task exited with an error"),
            Err(err) => error!(error = %err, "a server task panicked"),
        }
    }

    Ok(())
}
