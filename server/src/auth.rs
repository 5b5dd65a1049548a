//! The auth collaborator contract (spec.md §6).
//!
//! The account/organization/application/plan system is explicitly out of
//! scope (spec.md §1) — the core only ever calls through this trait. The
//! `StaticTokenAuth` implementation here is a stand-in a real deployment
//! replaces with a client against the management plane; it exists so the
//! trait boundary is exercised by something real instead of a mock.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// One of the fixed error codes spec.md §6 names. Each maps deterministically
/// to fatal-for-the-client (spec.md §4.7, §7) except where noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthErrorCode {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("ip not allowed")]
    IpNotAllowed,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("application not found")]
    AppNotFound,
    #[error("subdomain reserved")]
    SubdomainReserved,
}

/// What subdomains a resolved identity may bind.
#[derive(Debug, Clone)]
pub enum SubdomainScope {
    /// An account-level token: any subdomain not already owned by another
    /// account may be claimed.
    Wildcard,
    /// An account-level token restricted to a specific allow-list.
    Allowed(HashSet<String>),
    /// An application-bound token: exactly one forward is permitted, and
    /// its subdomain must equal this value.
    AppBound(String),
}

impl SubdomainScope {
    pub fn permits(&self, subdomain: &str) -> bool {
        match self {
            SubdomainScope::Wildcard => true,
            SubdomainScope::Allowed(set) => set.contains(subdomain),
            SubdomainScope::AppBound(bound) => bound == subdomain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub account_id: String,
    pub org_id: String,
    pub app_id: Option<String>,
    pub scope: SubdomainScope,
}

/// Fire-and-forget notification payload for `on_session_open`/`on_session_close`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub account_id: String,
    pub org_id: String,
    pub remote_addr: SocketAddr,
    pub subdomains: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountersSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub request_count: u64,
    pub duration_secs: u64,
}

/// The one contract the core consumes from the management plane.
#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    async fn resolve_token(
        &self,
        token: &str,
        app_id: Option<&str>,
        remote_addr: SocketAddr,
    ) -> Result<ResolvedIdentity, AuthErrorCode>;

    async fn on_session_open(&self, info: &SessionInfo);

    async fn on_session_close(&self, info: &SessionInfo, counters: CountersSnapshot);
}

#[derive(Debug, Deserialize)]
struct StaticTokenEntry {
    account_id: String,
    org_id: String,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    allowed_subdomains: Option<Vec<String>>,
    #[serde(default)]
    bound_subdomain: Option<String>,
    #[serde(default)]
    wildcard: bool,
}

/// Loads `token -> identity` from a JSON file. See `config.rs` for the flag
/// that points at this file; absent a file, every token is rejected as
/// `InvalidToken`, which is a safe (if useless) default.
pub struct StaticTokenAuth {
    tokens: HashMap<String, ResolvedIdentity>,
    start: Instant,
}

impl StaticTokenAuth {
    pub fn empty() -> Self {
        Self {
            tokens: HashMap::new(),
            start: Instant::now(),
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, StaticTokenEntry> = serde_json::from_str(&raw)?;
        let mut tokens = HashMap::with_capacity(entries.len());
        for (token, entry) in entries {
            let scope = if let Some(bound) = entry.bound_subdomain {
                SubdomainScope::AppBound(bound)
            } else if entry.wildcard {
                SubdomainScope::Wildcard
            } else {
                SubdomainScope::Allowed(entry.allowed_subdomains.unwrap_or_default().into_iter().collect())
            };
            tokens.insert(
                token,
                ResolvedIdentity {
                    account_id: entry.account_id,
                    org_id: entry.org_id,
                    app_id: entry.app_id,
                    scope,
                },
            );
        }
        Ok(Self {
            tokens,
            start: Instant::now(),
        })
    }
}

#[async_trait]
impl AuthCollaborator for StaticTokenAuth {
    async fn resolve_token(
        &self,
        token: &str,
        _app_id: Option<&str>,
        _remote_addr: SocketAddr,
    ) -> Result<ResolvedIdentity, AuthErrorCode> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthErrorCode::InvalidToken)
    }

    async fn on_session_open(&self, info: &SessionInfo) {
        tracing::info!(
            session_id = %info.session_id,
            account_id = %info.account_id,
            remote_addr = %info.remote_addr,
            subdomains = ?info.subdomains,
            "session opened"
        );
    }

    async fn on_session_close(&self, info: &SessionInfo, counters: CountersSnapshot) {
        tracing::info!(
            session_id = %info.session_id,
            account_id = %info.account_id,
            bytes_received = counters.bytes_received,
            bytes_sent = counters.bytes_sent,
            request_count = counters.request_count,
            uptime_secs = self.start.elapsed().as_secs(),
            "session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let auth = StaticTokenAuth::empty();
        let res = auth
            .resolve_token("nope", None, "127.0.0.1:1234".parse().unwrap())
            .await;
        assert_eq!(res.unwrap_err(), AuthErrorCode::InvalidToken);
    }

    #[test]
    fn scope_permits_matches_expected_rules() {
        assert!(SubdomainScope::Wildcard.permits("anything"));
        let allow = SubdomainScope::Allowed(["a".to_string()].into_iter().collect());
        assert!(allow.permits("a"));
        assert!(!allow.permits("b"));
        let bound = SubdomainScope::AppBound("a".to_string());
        assert!(bound.permits("a"));
        assert!(!bound.permits("b"));
    }

    #[test]
    fn loads_tokens_from_json_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tunnel-auth-test-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"tok1": {"account_id":"acc1","org_id":"org1","wildcard":true}}"#,
        )
        .unwrap();
        let auth = StaticTokenAuth::load_from_file(&path).unwrap();
        assert!(auth.tokens.contains_key("tok1"));
        std::fs::remove_file(&path).ok();
    }
}
