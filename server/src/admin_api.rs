//! Admin introspection API (spec.md §6): `GET /api/sessions` and
//! `POST /api/sessions/{id}/evict`. Same shape as the teacher's `api.rs`
//! (`list_agents`), generalized from "list connected agents" to "list and
//! evict live tunnel sessions" — the one piece of management-plane-adjacent
//! functionality spec.md keeps in the core rather than delegating to the
//! auth collaborator.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub account_id: String,
    pub org_id: String,
    pub remote_addr: String,
    pub subdomains: Vec<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub request_count: u64,
    pub uptime_secs: u64,
}

/// `GET /api/sessions` — every currently registered session.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionListItem>> {
    let items = state
        .registry
        .all_sessions()
        .into_iter()
        .map(|session| {
            let counters = session.counters.snapshot(session.created_at);
            SessionListItem {
                id: session.id.clone(),
                account_id: session.identity.account_id.clone(),
                org_id: session.identity.org_id.clone(),
                remote_addr: session.remote_addr.to_string(),
                subdomains: session.subdomains(),
                bytes_received: counters.bytes_received,
                bytes_sent: counters.bytes_sent,
                request_count: counters.request_count,
                uptime_secs: counters.duration_secs,
            }
        })
        .collect();
    Json(items)
}

/// `POST /api/sessions/{id}/evict` — administratively tears down a session:
/// closes its multiplexer and removes its registry entries, the same
/// shutdown path a failed keepalive triggers.
pub async fn evict_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let target = state
        .registry
        .all_sessions()
        .into_iter()
        .find(|s| s.id == id);

    match target {
        Some(session) => {
            crate::keepalive::shutdown(&session, &state.registry, state.auth.as_ref()).await;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}
