use thiserror::Error;

/// Error taxonomy from spec.md §7. Each variant maps to exactly one of the
/// propagation policies described there: wire-reported vs. request-scoped
/// vs. infrastructure-scoped.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("validation failed: {0}")]
    Validation(#[from] tunnel_protocol::ValidationError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("subdomain already in use: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("request timed out")]
    Timeout,

    #[error("no session registered for subdomain '{0}'")]
    NotRegistered(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] tunnel_protocol::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
