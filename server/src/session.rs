//! A single agent's registered tunnel session.
//!
//! Mirrors the teacher's `TunnelSession` (`state.rs`) — metadata about one
//! active tunnel — but carries a live `MuxConnection` instead of a socket
//! address pair, since every forward for an agent now shares one control
//! connection instead of one WebSocket per logical tunnel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tunnel_protocol::ForwardConfig;
use uuid::Uuid;

use crate::auth::{CountersSnapshot, ResolvedIdentity};
use crate::error::TunnelError;
use crate::transport::{MuxConnection, MuxStream};

#[derive(Default)]
pub struct SessionCounters {
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub request_count: AtomicU64,
}

impl SessionCounters {
    pub fn snapshot(&self, started_at: Instant) -> CountersSnapshot {
        CountersSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
            duration_secs: started_at.elapsed().as_secs(),
        }
    }
}

/// One agent's live tunnel session: its control connection, the forwards it
/// registered, and the identity the auth collaborator resolved for it.
pub struct Session {
    pub id: String,
    pub identity: ResolvedIdentity,
    pub forwards: Vec<ForwardConfig>,
    pub remote_addr: SocketAddr,
    pub created_at: Instant,
    pub counters: SessionCounters,
    mux: MuxConnection,
    closed: AtomicBool,
}

impl Session {
    pub fn new(
        identity: ResolvedIdentity,
        forwards: Vec<ForwardConfig>,
        mux: MuxConnection,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity,
            forwards,
            remote_addr,
            created_at: Instant::now(),
            counters: SessionCounters::default(),
            mux,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subdomains(&self) -> Vec<String> {
        self.forwards.iter().map(|f| f.subdomain.clone()).collect()
    }

    pub fn primary_forward(&self) -> Option<&ForwardConfig> {
        self.forwards
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.forwards.first())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.mux.is_closed()
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Opens one stream on the control connection to carry a single
    /// request/response exchange (spec.md §4.5).
    pub async fn open_stream(&self) -> Result<MuxStream, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::Transport("session is closed".into()));
        }
        self.mux.open_stream().await
    }

    pub async fn close(&self) {
        self.mux.close().await;
        self.mark_closed();
    }
}
