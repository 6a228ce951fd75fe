//! Server-side session store.
//!
//! Sessions live in an in-process moka cache keyed by an opaque identifier
//! carried in an HTTP-only cookie. Entries expire after a fixed idle lifetime.
//! The browser only ever sees the identifier; all attributes stay on the
//! server in a typed `SessionData` record.
//!
//! `renew_identifier` rotates the external identifier while preserving the
//! session data. The login flow calls it immediately before binding a verified
//! subject, so an identifier fixated by an attacker before authentication
//! stops resolving.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::future::Cache;

use crate::config::SESSION_ID_BYTES;
use crate::oidc::TokenBundle;
use crate::random::{random_string, EntropyError};

/// Upper bound on concurrently tracked sessions.
const MAX_SESSIONS: u64 = 100_000;

/// Typed per-session attributes. All fields are absent until set.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    /// Correlation identifier for logs and page display. Independent of the
    /// cookie identifier and never used for security decisions.
    pub display_id: Option<String>,
    /// Path + query the user was on before being sent to login.
    pub orig_path: Option<String>,
    /// Anti-CSRF state for the current login attempt.
    pub state: Option<String>,
    /// Replay-protection nonce for the current login attempt.
    pub nonce: Option<String>,
    /// Set once the current state/nonce pair has completed a callback.
    pub flow_consumed: bool,
    /// Token bundle from a successful code exchange.
    pub token: Option<TokenBundle>,
    /// Single-use marker for the stored token.
    pub token_used: bool,
    /// Verified identity-provider subject.
    pub subject: Option<String>,
}

#[derive(Debug)]
struct Inner {
    id: String,
    data: SessionData,
    fresh: bool,
    rotated: bool,
    destroyed: bool,
    dirty: bool,
}

/// Handle to one browser's session for the duration of a request.
///
/// Cheap to clone; all clones share the same underlying record. The store
/// persists mutations when the middleware calls `SessionStore::persist` at
/// the end of the request.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    fn existing(id: String, data: SessionData) -> Self {
        Self::from_inner(id, data, false)
    }

    fn fresh(id: String) -> Self {
        Self::from_inner(id, SessionData::default(), true)
    }

    fn from_inner(id: String, data: SessionData, fresh: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                id,
                data,
                fresh,
                rotated: false,
                destroyed: false,
                dirty: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock still holds consistent data; recover the guard so
        // one panicked request does not take every clone of the handle down.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current external (cookie) identifier.
    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    /// Whether the cookie must be (re-)sent: new session or rotated identifier.
    pub fn needs_cookie(&self) -> bool {
        let inner = self.lock();
        !inner.destroyed && (inner.fresh || inner.rotated)
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn display_id(&self) -> Option<String> {
        self.lock().data.display_id.clone()
    }

    pub fn set_display_id(&self, id: String) {
        let mut inner = self.lock();
        inner.data.display_id = Some(id);
        inner.dirty = true;
    }

    /// Stored original path, defaulting to the site root.
    pub fn orig_path_or_root(&self) -> String {
        self.lock()
            .data
            .orig_path
            .clone()
            .unwrap_or_else(|| "/".to_string())
    }

    pub fn set_orig_path(&self, path: String) {
        let mut inner = self.lock();
        inner.data.orig_path = Some(path);
        inner.dirty = true;
    }

    /// Store a fresh state/nonce pair for a new login attempt. Any prior
    /// pair is overwritten and its consumed marker reset.
    pub fn begin_login(&self, state: String, nonce: String) {
        let mut inner = self.lock();
        inner.data.state = Some(state);
        inner.data.nonce = Some(nonce);
        inner.data.flow_consumed = false;
        inner.dirty = true;
    }

    pub fn state(&self) -> Option<String> {
        self.lock().data.state.clone()
    }

    pub fn nonce(&self) -> Option<String> {
        self.lock().data.nonce.clone()
    }

    pub fn flow_consumed(&self) -> bool {
        self.lock().data.flow_consumed
    }

    /// Mark the current state/nonce pair as used by a completed callback.
    pub fn consume_flow(&self) {
        let mut inner = self.lock();
        inner.data.flow_consumed = true;
        inner.dirty = true;
    }

    pub fn token(&self) -> Option<TokenBundle> {
        self.lock().data.token.clone()
    }

    /// Store the exchanged token bundle, not yet used.
    pub fn set_token(&self, token: TokenBundle) {
        let mut inner = self.lock();
        inner.data.token = Some(token);
        inner.data.token_used = false;
        inner.dirty = true;
    }

    pub fn subject(&self) -> Option<String> {
        self.lock().data.subject.clone()
    }

    pub fn set_subject(&self, subject: String) {
        let mut inner = self.lock();
        inner.data.subject = Some(subject);
        inner.dirty = true;
    }

    fn snapshot(&self) -> (String, SessionData, bool, bool) {
        let inner = self.lock();
        (
            inner.id.clone(),
            inner.data.clone(),
            inner.dirty,
            inner.destroyed,
        )
    }

    fn swap_id(&self, new_id: String) -> (String, SessionData) {
        let mut inner = self.lock();
        let old_id = std::mem::replace(&mut inner.id, new_id);
        inner.rotated = true;
        inner.dirty = true;
        (old_id, inner.data.clone())
    }

    fn mark_destroyed(&self) {
        self.lock().destroyed = true;
    }
}

/// Source of new external session identifiers. Swappable so tests can
/// inject entropy failures, the same way `IdentityProvider` is stubbed.
pub type IdSource = Arc<dyn Fn() -> Result<String, EntropyError> + Send + Sync>;

/// In-memory session store with idle expiry.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<String, SessionData>,
    id_source: IdSource,
}

impl SessionStore {
    /// Create a store whose entries expire after `lifetime` of inactivity.
    pub fn new(lifetime: Duration) -> Self {
        Self::with_id_source(lifetime, Arc::new(|| random_string(SESSION_ID_BYTES, true)))
    }

    /// Like `new`, but with a custom identifier source.
    pub fn with_id_source(lifetime: Duration, id_source: IdSource) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_SESSIONS)
            .time_to_idle(lifetime)
            .build();

        Self { cache, id_source }
    }

    /// Load the session named by the cookie, or create an empty one when the
    /// cookie is absent or no longer resolves. Creation only fails when the
    /// entropy source cannot supply an identifier.
    pub async fn load_or_create(&self, cookie_id: Option<&str>) -> Result<Session, EntropyError> {
        if let Some(id) = cookie_id {
            if let Some(data) = self.cache.get(id).await {
                return Ok(Session::existing(id.to_string(), data));
            }
        }

        let id = (self.id_source)()?;
        Ok(Session::fresh(id))
    }

    /// Write the session back to the store. Destroyed sessions are removed,
    /// unmodified sessions are left untouched.
    pub async fn persist(&self, session: &Session) {
        let (id, data, dirty, destroyed) = session.snapshot();

        if destroyed {
            self.cache.invalidate(&id).await;
        } else if dirty {
            self.cache.insert(id, data).await;
        }
    }

    /// Rotate the session's external identifier, preserving its data. The old
    /// identifier stops resolving immediately.
    pub async fn renew_identifier(&self, session: &Session) -> Result<(), EntropyError> {
        let new_id = (self.id_source)()?;
        let (old_id, data) = session.swap_id(new_id.clone());

        self.cache.invalidate(&old_id).await;
        self.cache.insert(new_id, data).await;

        Ok(())
    }

    /// Remove the session from the store and mark the handle so the cookie
    /// gets cleared on the way out.
    pub async fn destroy(&self, session: &Session) {
        let id = session.id();
        session.mark_destroyed();
        self.cache.invalidate(&id).await;
    }
}
