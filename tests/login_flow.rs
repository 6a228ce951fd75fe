//! End-to-end tests of the login flow against the real router.
//!
//! The identity provider is replaced by a stub implementing
//! `IdentityProvider`, so every validation gate of the callback can be
//! exercised without a network. Requests are driven through
//! `tower::ServiceExt::oneshot`; cookies are threaded manually between
//! requests the way a browser would.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::{header, Request, Response, StatusCode};
use tower::ServiceExt;

use vestibule::config::{
    AppConfig, AssetConfig, HttpServerConfig, LoggingConfig, OidcConfig, SessionConfig, UiConfig,
    SESSION_ID_BYTES,
};
use vestibule::oidc::{IdTokenClaims, IdentityProvider, ProviderError, TokenBundle};
use vestibule::random::{random_string, EntropyError};
use vestibule::routes::create_router;
use vestibule::session::{IdSource, SessionStore};
use vestibule::state::AppState;
use vestibule::templates::init_templates;

/// Stub identity provider. Remembers the nonce embedded in the last
/// authorization URL and echoes it from ID-token verification, mirroring
/// the real round-trip through the provider.
struct StubProvider {
    issued_nonce: Mutex<Option<String>>,
    exchange_calls: AtomicUsize,
    /// Return a wrong nonce claim from verification.
    corrupt_nonce: bool,
    /// Subjects returned by successive userinfo queries; "alice" when empty.
    subjects: Mutex<VecDeque<&'static str>>,
}

impl StubProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            issued_nonce: Mutex::new(None),
            exchange_calls: AtomicUsize::new(0),
            corrupt_nonce: false,
            subjects: Mutex::new(VecDeque::new()),
        })
    }

    fn with_corrupt_nonce() -> Arc<Self> {
        Arc::new(Self {
            issued_nonce: Mutex::new(None),
            exchange_calls: AtomicUsize::new(0),
            corrupt_nonce: true,
            subjects: Mutex::new(VecDeque::new()),
        })
    }

    fn with_subjects(subjects: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            issued_nonce: Mutex::new(None),
            exchange_calls: AtomicUsize::new(0),
            corrupt_nonce: false,
            subjects: Mutex::new(subjects.iter().copied().collect()),
        })
    }

    fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    fn authorization_url(&self, state: &str, nonce: &str) -> String {
        *self.issued_nonce.lock().unwrap() = Some(nonce.to_string());
        format!(
            "https://idp.example/authorize?response_type=code&client_id=vestibule\
             &redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Flogin%2Fcallback\
             &scope=openid+profile+email&state={state}&nonce={nonce}"
        )
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenBundle, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenBundle {
            access_token: "stub-access-token".to_string(),
            id_token: Some("stub-id-token".to_string()),
            refresh_token: None,
            expires_in: Some(Duration::from_secs(300)),
        })
    }

    fn verify_id_token(&self, _raw: &str) -> Result<IdTokenClaims, ProviderError> {
        let nonce = if self.corrupt_nonce {
            Some("not-the-issued-nonce".to_string())
        } else {
            self.issued_nonce.lock().unwrap().clone()
        };
        Ok(IdTokenClaims {
            subject: "alice".to_string(),
            nonce,
        })
    }

    async fn userinfo_subject(&self, _token: &TokenBundle) -> Result<String, ProviderError> {
        let next = self.subjects.lock().unwrap().pop_front().unwrap_or("alice");
        Ok(next.to_string())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        http: HttpServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        oidc: OidcConfig {
            issuer_url: "https://idp.example".to_string(),
            client_id: "vestibule".to_string(),
            client_secret: "test-secret".to_string(),
            base_url: None,
        },
        assets: AssetConfig::default(),
        session: SessionConfig::default(),
        ui: UiConfig {
            site_name: Some("Vestibule".to_string()),
            ..Default::default()
        },
        logging: LoggingConfig::default(),
    }
}

fn test_router(provider: Arc<StubProvider>) -> Router {
    test_router_with_store(provider, SessionStore::new(Duration::from_secs(180)))
}

fn test_router_with_store(provider: Arc<StubProvider>, sessions: SessionStore) -> Router {
    let tera = init_templates("assets/templates/**/*").expect("templates should parse");
    let state = AppState::new(test_config(), tera, sessions, provider);
    create_router(state)
}

fn entropy_failure() -> EntropyError {
    let code = NonZeroU32::new(getrandom::Error::CUSTOM_START + 17).unwrap();
    getrandom::Error::from(code).into()
}

/// Identifier source that fails on exactly one call (zero-based), generating
/// real identifiers otherwise.
fn failing_id_source(failing_call: usize) -> IdSource {
    let calls = AtomicUsize::new(0);
    Arc::new(move || {
        if calls.fetch_add(1, Ordering::SeqCst) == failing_call {
            Err(entropy_failure())
        } else {
            random_string(SESSION_ID_BYTES, true)
        }
    })
}

async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// First `name=value` pair of the response's session cookie, ready for reuse
/// as a Cookie request header.
fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(';').next())
        .map(|s| s.to_string())
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("Location header")
        .to_str()
        .unwrap()
        .to_string()
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Walk the happy path up to (and including) a successful callback.
/// Returns the post-callback cookie and the used state value.
async fn complete_login(router: &Router, cookie: &str) -> (String, String) {
    let init = get(router, "/login/init", Some(cookie)).await;
    assert_eq!(init.status(), StatusCode::FOUND);
    let auth_url = location(&init);
    let state = query_param(&auth_url, "state").expect("state in auth URL");

    let callback = get(
        router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(cookie),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::FOUND);
    let new_cookie = session_cookie(&callback).expect("rotated session cookie");

    (new_cookie, state)
}

#[tokio::test]
async fn init_redirects_with_decodable_state_and_nonce() {
    let provider = StubProvider::new();
    let router = test_router(provider);

    let response = get(&router, "/login/init", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let auth_url = location(&response);
    assert!(auth_url.contains("client_id="));

    for name in ["state", "nonce"] {
        let value = query_param(&auth_url, name).expect("parameter present");
        let decoded = URL_SAFE_NO_PAD.decode(&value).expect("url-safe base64");
        assert_eq!(decoded.len(), 16, "{name} must carry 16 bytes of entropy");
    }
}

#[tokio::test]
async fn full_login_flow_binds_subject_and_returns_to_orig_path() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    // Visit a page first so the session records where the user started.
    let index = get(&router, "/?tab=welcome", None).await;
    assert_eq!(index.status(), StatusCode::OK);
    let cookie = session_cookie(&index).expect("fresh session cookie");

    let init = get(&router, "/login/init", Some(&cookie)).await;
    assert_eq!(init.status(), StatusCode::FOUND);
    let auth_url = location(&init);
    let state = query_param(&auth_url, "state").unwrap();

    let callback = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::FOUND);
    assert_eq!(location(&callback), "/?tab=welcome");
    assert_eq!(provider.exchange_calls(), 1);

    // The session identifier was rotated at the authentication boundary.
    let rotated_cookie = session_cookie(&callback).expect("rotated session cookie");
    assert_ne!(rotated_cookie, cookie);

    // The authenticated subject renders on the index page.
    let home = get(&router, "/", Some(&rotated_cookie)).await;
    let body = body_string(home).await;
    assert!(body.contains("alice"));

    // The pre-rotation identifier no longer resolves to the session.
    let stale = get(&router, "/", Some(&cookie)).await;
    let body = body_string(stale).await;
    assert!(!body.contains("alice"));
}

#[tokio::test]
async fn callback_without_prior_login_is_rejected() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    let response = get(&router, "/login/callback?state=x&code=abc", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 0);
}

#[tokio::test]
async fn state_mismatch_never_reaches_token_exchange() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");

    let response = get(
        &router,
        "/login/callback?state=forged&code=abc",
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 0);
}

#[tokio::test]
async fn empty_code_is_rejected() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");
    let state = query_param(&location(&init), "state").unwrap();

    let response = get(
        &router,
        &format!("/login/callback?state={state}&code="),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 0);

    let body = body_string(response).await;
    assert!(body.contains("authorization code"));
}

#[tokio::test]
async fn nonce_mismatch_leaves_subject_unset() {
    let provider = StubProvider::with_corrupt_nonce();
    let router = test_router(provider);

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");
    let state = query_param(&location(&init), "state").unwrap();

    let response = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // Rejection happened before rotation, so the cookie still resolves,
    // and no subject was bound.
    let home = get(&router, "/", Some(&cookie)).await;
    let body = body_string(home).await;
    assert!(!body.contains("alice"));
    assert!(body.contains("not signed in"));
}

#[tokio::test]
async fn post_auth_subject_mismatch_is_forbidden() {
    // First userinfo query resolves the subject, the consistency re-check
    // sees a different identity.
    let provider = StubProvider::with_subjects(&["alice", "mallory"]);
    let router = test_router(provider);

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");
    let state = query_param(&location(&init), "state").unwrap();

    let response = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rotation_failure_destroys_the_session() {
    let provider = StubProvider::new();
    // First identifier (session creation) succeeds; the second, drawn at
    // rotation time, fails.
    let sessions =
        SessionStore::with_id_source(Duration::from_secs(180), failing_id_source(1));
    let router = test_router_with_store(provider.clone(), sessions);

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");
    let state = query_param(&location(&init), "state").unwrap();

    let response = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(provider.exchange_calls(), 1);

    // The session was destroyed, so the response clears the cookie ...
    assert_eq!(
        session_cookie(&response).as_deref(),
        Some("vestibule_session=")
    );

    // ... and the pre-rotation identifier no longer resolves: presenting it
    // yields a brand-new session with a different identifier.
    let home = get(&router, "/", Some(&cookie)).await;
    let fresh = session_cookie(&home).expect("fresh session cookie");
    assert_ne!(fresh, cookie);
    let body = body_string(home).await;
    assert!(body.contains("not signed in"));
}

#[tokio::test]
async fn callback_defaults_to_root_without_orig_path() {
    let provider = StubProvider::new();
    let router = test_router(provider);

    let init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&init).expect("session cookie");
    let state = query_param(&location(&init), "state").unwrap();

    let callback = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::FOUND);
    assert_eq!(location(&callback), "/");
}

#[tokio::test]
async fn completed_state_nonce_pair_cannot_be_replayed() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    let index = get(&router, "/", None).await;
    let cookie = session_cookie(&index).expect("fresh session cookie");

    let (rotated_cookie, state) = complete_login(&router, &cookie).await;
    assert_eq!(provider.exchange_calls(), 1);

    // Replaying the completed callback against the live session fails the
    // state gate; the provider sees no second exchange.
    let replay = get(
        &router,
        &format!("/login/callback?state={state}&code=abc"),
        Some(&rotated_cookie),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 1);
}

#[tokio::test]
async fn new_login_attempt_invalidates_previous_pair() {
    let provider = StubProvider::new();
    let router = test_router(provider.clone());

    let first_init = get(&router, "/login/init", None).await;
    let cookie = session_cookie(&first_init).expect("session cookie");
    let first_state = query_param(&location(&first_init), "state").unwrap();

    // A second init overwrites the stored pair.
    let second_init = get(&router, "/login/init", Some(&cookie)).await;
    assert_eq!(second_init.status(), StatusCode::FOUND);

    let response = get(
        &router,
        &format!("/login/callback?state={first_state}&code=abc"),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 0);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let router = test_router(StubProvider::new());

    let response = get(&router, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn static_assets_carry_immutable_cache_header() {
    let router = test_router(StubProvider::new());

    let response = get(&router, "/static/css/style.css", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cache = response
        .headers()
        .get(header::CACHE_CONTROL)
        .expect("Cache-Control header")
        .to_str()
        .unwrap();
    assert!(cache.contains("immutable"));
}
