//! Client side of the registration handshake (spec.md §4.3): open the first
//! stream, send `AuthRequest`, wait for `AuthResponse`.

use std::time::Duration;

use tunnel_protocol::{Frame, ForwardConfig, TunnelInfo};

use crate::config::Config;
use crate::framing::{read_frame, write_frame};
use crate::transport::MuxConnection;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// The fatal auth-failure reasons spec.md §4.7 lists — a client seeing one
/// of these in `AuthResponse.error` must stop reconnecting rather than
/// retry with backoff.
const FATAL_REASON_FRAGMENTS: &[&str] = &[
    "invalid token",
    "token expired",
    "ip not allowed",
    "quota exceeded",
    "application not found",
    "subdomain reserved",
    "subdomain already in use",
];

pub fn is_fatal_reason(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    FATAL_REASON_FRAGMENTS.iter().any(|f| lower.contains(f))
}

pub struct Registered {
    pub tunnels: Vec<TunnelInfo>,
}

pub async fn register(
    mux: &MuxConnection,
    config: &Config,
    forwards: Vec<ForwardConfig>,
) -> anyhow::Result<Registered> {
    let mut stream = mux.open_stream().await?;

    let request = Frame::AuthRequest {
        token: config.token.clone(),
        forwards,
        app_id: config.app_id.clone(),
    };
    write_frame(&mut stream, &request).await?;

    let response = tokio::time::timeout(AUTH_TIMEOUT, read_frame(&mut stream))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for AuthResponse"))??;

    match response {
        Frame::AuthResponse {
            success: true,
            tunnels: Some(tunnels),
            ..
        } => Ok(Registered { tunnels }),
        Frame::AuthResponse {
            success: false,
            error,
            ..
        } => Err(anyhow::anyhow!(
            "registration rejected: {}",
            error.unwrap_or_else(|| "unknown reason".to_string())
        )),
        other => Err(anyhow::anyhow!("unexpected frame during handshake: {}", other.kind())),
    }
}
