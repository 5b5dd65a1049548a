//! Stream multiplexing and TLS termination for the tunnel (control-plane)
//! listener.
//!
//! The teacher relayed bytes over a single WebSocket per logical stream
//! (`handlers.rs`'s `handle_connection`); spec.md §4.2 instead asks for one
//! TLS connection per agent carrying many multiplexed streams. `yamux` (the
//! multiplexer libp2p uses) replaces the WebSocket framing; `tokio-rustls`
//! replaces the teacher's unused-but-declared `rustls`/`rcgen` pair with a
//! real job: terminating TLS on the tunnel port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

use crate::config::Config;
use crate::error::TunnelError;

/// Builds the TLS acceptor for the tunnel listener. With no cert/key
/// configured, a self-signed certificate is minted for the configured base
/// domain — convenient for local development, never appropriate in
/// production (spec.md §9 leaves operators responsible for real certs).
pub fn build_tls_acceptor(config: &Config) -> anyhow::Result<TlsAcceptor> {
    let (chain, key) = match (&config.tunnel_tls_cert, &config.tunnel_tls_key) {
        (Some(cert_path), Some(key_path)) => load_pem(cert_path, key_path)?,
        _ => {
            tracing::warn!("no TLS cert/key configured, generating an ephemeral self-signed certificate");
            self_signed(&config.base_domain)?
        }
    };

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("failed to build TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_pem(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_bytes = std::fs::read(cert_path)
        .with_context(|| format!("reading TLS cert at {}", cert_path.display()))?;
    let key_bytes = std::fs::read(key_path)
        .with_context(|| format!("reading TLS key at {}", key_path.display()))?;

    let chain = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("parsing PEM certificate chain")?;
    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .context("parsing PEM private key")?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    Ok((chain, key))
}

fn self_signed(
    base_domain: &str,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let wildcard = format!("*.{base_domain}");
    let cert = rcgen::generate_simple_self_signed(vec![base_domain.to_string(), wildcard])
        .context("generating self-signed certificate")?;
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(cert.signing_key.serialize_der())
        .map_err(|e| anyhow::anyhow!("invalid generated private key: {e}"))?;
    Ok((vec![cert_der], key_der))
}

/// A single yamux stream, readable/writable via the standard tokio traits.
pub type MuxStream = Compat<yamux::Stream>;

/// One multiplexed control-plane connection to an agent.
///
/// The yamux connection itself is driven by a background task (yamux
/// requires polling to both accept inbound streams and make progress on
/// outbound ones); callers interact only through `open_stream` and
/// `accept_stream`.
pub struct MuxConnection {
    control: Mutex<yamux::Control>,
    accept_rx: Mutex<mpsc::Receiver<yamux::Stream>>,
    driver: tokio::task::JoinHandle<()>,
    closed: Arc<AtomicBool>,
    remote_addr: SocketAddr,
}

impl MuxConnection {
    /// Wraps an already-TLS-terminated connection and spawns its driver task.
    pub fn new(tls_stream: TlsStream<TcpStream>, remote_addr: SocketAddr) -> Self {
        let io = tls_stream.compat();
        let mut connection = yamux::Connection::new(io, yamux::Config::default(), yamux::Mode::Server);
        let control = connection.control();
        let (tx, rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        let closed_for_driver = closed.clone();

        let driver = tokio::spawn(async move {
            use futures::StreamExt;
            loop {
                match connection.next().await {
                    Some(Ok(stream)) => {
                        if tx.send(stream).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "mux connection terminated");
                        break;
                    }
                    None => break,
                }
            }
            closed_for_driver.store(true, Ordering::SeqCst);
        });

        Self {
            control: Mutex::new(control),
            accept_rx: Mutex::new(rx),
            driver,
            closed,
            remote_addr,
        }
    }

    /// Opens a new outbound stream — used by the dispatcher to carry one
    /// `RequestFrame`/`ResponseFrame` exchange per public HTTP request.
    pub async fn open_stream(&self) -> Result<MuxStream, TunnelError> {
        let mut control = self.control.lock().await;
        let stream = control
            .open_stream()
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))?;
        Ok(stream.compat())
    }

    /// Accepts the next inbound stream, if the agent opens one (unused by
    /// the current frame exchange, reserved for future bidirectional use).
    pub async fn accept_stream(&self) -> Option<MuxStream> {
        let mut rx = self.accept_rx.lock().await;
        rx.recv().await.map(|s| s.compat())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub async fn close(&self) {
        let mut control = self.control.lock().await;
        let _ = control.close().await;
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for MuxConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
