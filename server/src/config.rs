use std::path::PathBuf;

use clap::Parser;

/// Startup configuration, one field per key in spec.md §6's environment
/// contract. Every key is readable from its env var or the matching flag;
/// `clap`'s `env` feature keeps the two in sync for free.
#[derive(Debug, Clone, Parser)]
#[command(name = "tunnel-server", about = "Reverse HTTP tunnel edge server")]
pub struct Config {
    /// The wildcard parent domain, e.g. `example.com`.
    #[arg(long, env = "TUNNEL_BASE_DOMAIN")]
    pub base_domain: String,

    /// Tunnel (control-plane) listener port.
    #[arg(long, env = "TUNNEL_PORT", default_value_t = 4443)]
    pub tunnel_port: u16,

    /// Public HTTP listener port.
    #[arg(long, env = "PUBLIC_HTTP_PORT", default_value_t = 8080)]
    pub public_http_port: u16,

    /// Public HTTPS listener port. Omit to serve HTTP only.
    #[arg(long, env = "PUBLIC_HTTPS_PORT")]
    pub public_https_port: Option<u16>,

    /// Scheme used when constructing public tunnel URLs.
    #[arg(long, env = "PUBLIC_SCHEME", default_value = "https")]
    pub public_scheme: String,

    /// PEM certificate chain for the tunnel TLS listener. If unset, an
    /// ephemeral self-signed certificate is generated (development only).
    #[arg(long, env = "TUNNEL_TLS_CERT")]
    pub tunnel_tls_cert: Option<PathBuf>,

    /// PEM private key for the tunnel TLS listener.
    #[arg(long, env = "TUNNEL_TLS_KEY")]
    pub tunnel_tls_key: Option<PathBuf>,

    /// CIDR ranges whose X-Forwarded-For / X-Real-IP headers are trusted.
    #[arg(long, env = "TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<String>,

    /// Per-request end-to-end deadline.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Public request body cap in bytes.
    #[arg(long, env = "MAX_REQUEST_BODY", default_value_t = 10 * 1024 * 1024)]
    pub max_request_body: usize,

    /// Address the admin/introspection API binds to (same process, separate route tree).
    #[arg(long, env = "ADMIN_BIND_PORT", default_value_t = 7070)]
    pub admin_port: u16,

    /// Path to a JSON file mapping bearer tokens to identities for the
    /// bundled `StaticTokenAuth` collaborator (see auth.rs).
    #[arg(long, env = "AUTH_TOKENS_FILE")]
    pub auth_tokens_file: Option<PathBuf>,

    /// Max concurrent tunnel sessions.
    #[arg(long, env = "MAX_SESSIONS", default_value_t = 1024)]
    pub max_sessions: usize,
}

impl Config {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
