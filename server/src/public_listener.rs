//! Binds the public HTTP/HTTPS listeners that serve tunneled traffic.
//!
//! Plain HTTP uses `axum::serve` directly, as the teacher did for its single
//! listener. HTTPS additionally terminates TLS per-connection before handing
//! the stream to the same router, following the pattern axum's own
//! low-level TLS examples use: a manual accept loop, `tokio-rustls` for the
//! handshake, and `hyper-util`'s auto (`h1`/`h2`) connection builder to drive
//! the router as a `tower::Service`.

use axum::extract::Request;
use axum::routing::get;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tower_http::cors::CorsLayer;

use crate::dispatcher;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(dispatcher::healthz))
        .fallback(dispatcher::handle)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve_http(app: Router, port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "public HTTP listener bound");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub async fn serve_https(app: Router, port: u16, tls_acceptor: TlsAcceptor) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "public HTTPS listener bound");

    loop {
        let (tcp_stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept public connection");
                continue;
            }
        };
        let acceptor = tls_acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!(%remote_addr, error = %err, "public TLS handshake failed");
                    return;
                }
            };
            let io = TokioIo::new(tls_stream);
            let hyper_service = hyper::service::service_fn(move |mut req: Request| {
                let mut app = app.clone();
                req.extensions_mut()
                    .insert(axum::extract::ConnectInfo(remote_addr));
                async move { app.call(req).await }
            });
            if let Err(err) = AutoBuilder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, hyper_service)
                .await
            {
                tracing::debug!(%remote_addr, error = %err, "public HTTPS connection ended");
            }
        });
    }
}

pub fn tls_acceptor_for(config: &crate::config::Config) -> anyhow::Result<Option<TlsAcceptor>> {
    if config.public_https_port.is_none() {
        return Ok(None);
    }
    Ok(Some(crate::transport::build_tls_acceptor(config)?))
}
