//! Shared application state for request handlers.

use std::sync::Arc;
use tera::Tera;

use crate::config::AppConfig;
use crate::oidc::IdentityProvider;
use crate::session::SessionStore;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// Contains the application configuration, Tera template engine, the
/// server-side session store, and the identity-provider client. Handlers
/// receive it by dependency injection; there is no global mutable state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tera: Arc<Tera>,
    pub sessions: SessionStore,
    pub provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Creates a new application state from the given configuration,
    /// templates, session store, and provider client.
    pub fn new(
        config: AppConfig,
        tera: Tera,
        sessions: SessionStore,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            tera: Arc::new(tera),
            sessions,
            provider,
        }
    }
}
