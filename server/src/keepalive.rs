//! Background keepalive for a registered session (spec.md §4.3): a `Ping`
//! every 30 seconds on a dedicated stream, two consecutive missed `Pong`s
//! declare the session dead and trigger the single `ALIVE → CLOSED`
//! shutdown transition.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tunnel_protocol::Frame;

use crate::auth::{AuthCollaborator, SessionInfo};
use crate::framing::{read_frame, write_frame};
use crate::registry::SubdomainRegistry;
use crate::session::Session;

const INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSES: u32 = 2;

pub async fn run(session: Arc<Session>, registry: Arc<SubdomainRegistry>, auth: Arc<dyn AuthCollaborator>) {
    let mut stream = match session.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(session_id = %session.id, error = %err, "could not open keepalive stream");
            shutdown(&session, &registry, auth.as_ref()).await;
            return;
        }
    };

    let mut misses = 0u32;
    loop {
        tokio::time::sleep(INTERVAL).await;
        if session.is_closed() {
            break;
        }

        if write_frame(&mut stream, &Frame::Ping).await.is_err() {
            misses += 1;
        } else {
            match timeout(INTERVAL, read_frame(&mut stream)).await {
                Ok(Ok(Frame::Pong)) => misses = 0,
                _ => misses += 1,
            }
        }

        if misses >= MAX_MISSES {
            tracing::info!(session_id = %session.id, "keepalive failed, declaring session dead");
            break;
        }
    }

    shutdown(&session, &registry, auth.as_ref()).await;
}

/// Session shutdown (spec.md §4.3): unbind from the registry, close the
/// multiplexer, and notify the auth collaborator so usage accounting sees a
/// final counters snapshot. Shared by the keepalive-death path and the
/// admin eviction path so both go through one transition.
pub async fn shutdown(session: &Arc<Session>, registry: &SubdomainRegistry, auth: &dyn AuthCollaborator) {
    registry.unbind_all(session).await;
    session.close().await;
    let counters = session.counters.snapshot(session.created_at);
    auth.on_session_close(
        &SessionInfo {
            session_id: session.id.clone(),
            account_id: session.identity.account_id.clone(),
            org_id: session.identity.org_id.clone(),
            remote_addr: session.remote_addr,
            subdomains: session.subdomains(),
        },
        counters,
    )
    .await;
}
