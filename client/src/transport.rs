//! Dials the tunnel edge and brings up the client side of the multiplexer.
//!
//! Mirrors `server::transport` but in the client (dialing) role: `rustls`
//! with `webpki-roots` for certificate verification (the teacher's existing
//! `rustls`/`webpki-roots` pair, previously declared but unused), or a
//! no-verification stub for `--insecure-skip-verify` development use.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

use crate::config::Config;

pub type MuxStream = Compat<yamux::Stream>;

/// One multiplexed connection to the edge, driven by a background task —
/// the dialing counterpart of `server::transport::MuxConnection`.
pub struct MuxConnection {
    control: tokio::sync::Mutex<yamux::Control>,
    accept_rx: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<yamux::Stream>>,
    driver: tokio::task::JoinHandle<()>,
}

impl MuxConnection {
    pub async fn dial(config: &Config) -> anyhow::Result<Self> {
        let tcp_stream = TcpStream::connect(&config.server_addr)
            .await
            .with_context(|| format!("dialing {}", config.server_addr))?;
        tcp_stream.set_nodelay(true).context("setting TCP_NODELAY")?;

        let tls_stream = connect_tls(tcp_stream, config).await?;
        let io = tls_stream.compat();

        let mut connection = yamux::Connection::new(io, yamux::Config::default(), yamux::Mode::Client);
        let control = connection.control();
        let (tx, rx) = tokio::sync::mpsc::channel(64);

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
        });

        Ok(Self {
            control: tokio::sync::Mutex::new(control),
            accept_rx: tokio::sync::Mutex::new(rx),
            driver,
        })
    }

    pub async fn open_stream(&self) -> anyhow::Result<MuxStream> {
        let mut control = self.control.lock().await;
        let stream = control.open_stream().await.context("opening mux stream")?;
        Ok(stream.compat())
    }

    pub async fn accept_stream(&self) -> Option<MuxStream> {
        let mut rx = self.accept_rx.lock().await;
        rx.recv().await.map(|s| s.compat())
    }

    pub async fn close(&self) {
        let mut control = self.control.lock().await;
        let _ = control.close().await;
    }
}

impl Drop for MuxConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn connect_tls(tcp_stream: TcpStream, config: &Config) -> anyhow::Result<TlsStream<TcpStream>> {
    let tls_config = if config.insecure_skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.tls_server_name())
        .context("invalid TLS server name")?
        .to_owned();
    connector
        .connect(server_name, tcp_stream)
        .await
        .context("TLS handshake with tunnel edge failed")
}

/// Accepts any server certificate, for `--insecure-skip-verify` development.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}
