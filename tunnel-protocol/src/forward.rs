use serde::{Deserialize, Serialize};

/// A client's request to expose one local endpoint under a subdomain of the
/// edge's base domain. Constructed on the client, shipped once inside an
/// `AuthRequest`, never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Lowercase DNS label, 1-63 chars, `[a-z0-9-]`, not starting/ending with `-`.
    pub subdomain: String,
    /// Local port the agent should forward requests to (1-65535).
    pub local_port: u16,
    /// Whether the local service speaks HTTPS.
    #[serde(default)]
    pub local_https: bool,
    /// At most one forward per `AuthRequest` may set this.
    #[serde(default)]
    pub primary: bool,
}

/// The server's confirmation of one bound forward, returned in `AuthResponse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelInfo {
    pub subdomain: String,
    pub public_url: String,
    pub local_port: u16,
}
