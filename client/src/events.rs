//! Narrow event stream the supervisor emits status transitions and
//! request-lifecycle events on. Stands in for the Tauri `app_handle.emit`
//! calls the teacher's `agent.rs`/`commands.rs` used to push updates to its
//! desktop UI — here a CLI consumer in `main.rs` just logs them, since the
//! terminal UI itself is out of scope.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Connecting { server_addr: String },
    Authenticating,
    Online { tunnels: Vec<TunnelSummary>, reconnect_count: u32 },
    Disconnected { reason: String },
    Rejected { reason: String },
    RequestHandled { subdomain: String, status: u16 },
    RequestFailed { subdomain: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct TunnelSummary {
    pub subdomain: String,
    pub public_url: String,
    pub local_port: u16,
}

pub type EventSender = mpsc::Sender<AgentEvent>;
pub type EventReceiver = mpsc::Receiver<AgentEvent>;

/// Bounded so a slow/absent consumer applies backpressure rather than
/// growing without limit; 64 is generous for a stream nobody free-runs much
/// faster than human-readable log lines anyway.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel(64)
}
