//! Shared application state, cloned and passed to every request handler.
//!
//! The teacher's `AppState` (kept as a naming convention) held three
//! `DashMap`s keyed by agent/connection/session id. Those collapse here into
//! one `SubdomainRegistry`, alongside the auth collaborator, immutable
//! config, and the proxy trust list the dispatcher consults per request.

use std::sync::Arc;

use crate::auth::AuthCollaborator;
use crate::config::Config;
use crate::registry::SubdomainRegistry;
use crate::trusted_proxy::TrustedProxies;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubdomainRegistry>,
    pub auth: Arc<dyn AuthCollaborator>,
    pub config: Arc<Config>,
    pub trusted_proxies: Arc<TrustedProxies>,
}

impl AppState {
    pub fn new(
        auth: Arc<dyn AuthCollaborator>,
        config: Arc<Config>,
        trusted_proxies: TrustedProxies,
    ) -> Self {
        Self {
            registry: Arc::new(SubdomainRegistry::new()),
            auth,
            config,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}
