use clap::Parser;

/// One `--forward` flag value: `subdomain:local_port[:https][:primary]`.
#[derive(Debug, Clone)]
pub struct ForwardArg {
    pub subdomain: String,
    pub local_port: u16,
    pub local_https: bool,
    pub primary: bool,
}

impl std::str::FromStr for ForwardArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let subdomain = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "forward requires a subdomain".to_string())?
            .to_string();
        let local_port = parts
            .next()
            .ok_or_else(|| "forward requires a local port".to_string())?
            .parse::<u16>()
            .map_err(|e| format!("invalid local port: {e}"))?;
        let mut local_https = false;
        let mut primary = false;
        for flag in parts {
            match flag {
                "https" => local_https = true,
                "primary" => primary = true,
                other => return Err(format!("unrecognized forward flag '{other}'")),
            }
        }
        Ok(ForwardArg {
            subdomain,
            local_port,
            local_https,
            primary,
        })
    }
}

/// Agent startup configuration. Mirrors `server::config::Config` in shape —
/// every key is an env var or flag — generalized from the teacher's single
/// hardcoded `ws://...` server URL in `agent.rs`.
#[derive(Debug, Clone, Parser)]
#[command(name = "tunnel-client", about = "Reverse HTTP tunnel agent")]
pub struct Config {
    /// Tunnel edge host:port to dial, e.g. `edge.example.com:4443`.
    #[arg(long, env = "TUNNEL_SERVER_ADDR")]
    pub server_addr: String,

    /// Server name used for TLS certificate verification (defaults to the
    /// host portion of `server_addr`).
    #[arg(long, env = "TUNNEL_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Bearer token presented in the `AuthRequest`.
    #[arg(long, env = "TUNNEL_TOKEN")]
    pub token: String,

    /// Application id, for application-bound tokens.
    #[arg(long, env = "TUNNEL_APP_ID")]
    pub app_id: Option<String>,

    /// One or more `subdomain:local_port[:https][:primary]` forwards.
    #[arg(long = "forward", required = true)]
    pub forwards: Vec<ForwardArg>,

    /// Skip TLS certificate verification against the edge server
    /// (development only — never use against a production edge).
    #[arg(long, env = "TUNNEL_INSECURE_SKIP_VERIFY", default_value_t = false)]
    pub insecure_skip_verify: bool,

    /// Skip TLS certificate verification against local forward targets
    /// whose `local_https` flag is set.
    #[arg(long, env = "TUNNEL_LOCAL_INSECURE_SKIP_VERIFY", default_value_t = false)]
    pub local_insecure_skip_verify: bool,
}

impl Config {
    pub fn tls_server_name(&self) -> String {
        self.server_name.clone().unwrap_or_else(|| {
            self.server_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| self.server_addr.clone())
        })
    }
}
