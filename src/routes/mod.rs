//! HTTP route handlers for the login frontend.
//!
//! Routes are organized by content type, with per-route Cache-Control
//! headers: session-bound pages and the login flow are never cached, while
//! static assets use a long max-age with the immutable hint.
//!
//! Every request passes through the session middleware, which binds a
//! server-side session before dispatch and persists it afterwards.

pub mod auth;
pub mod health;
pub mod home;

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{CACHE_CONTROL_NO_STORE, CACHE_CONTROL_STATIC, CALLBACK_PATH};
use crate::middleware::session_layer;
use crate::state::AppState;

/// Creates the Axum router with all routes and cache headers.
pub fn create_router(state: AppState) -> Router {
    // Index - rendered per session, never cached
    let page_routes = Router::new().route("/", get(home::index)).layer(
        SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ),
    );

    // Login flow - stateful, never cached
    let auth_routes = Router::new()
        .route("/login/init", get(auth::init))
        .route(CALLBACK_PATH, get(auth::callback))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    // Static files - long cache with immutable hint
    let static_routes = Router::new()
        .nest_service("/static", ServeDir::new(state.config.assets.static_dir()))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_STATIC),
        ));

    // Health check - no caching, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health));

    Router::new()
        .merge(page_routes)
        .merge(auth_routes)
        .merge(health_routes)
        .merge(static_routes)
        .with_state(state.clone())
        // Session middleware - loads/persists the session and creates the
        // request span with session_id for correlation
        .layer(middleware::from_fn_with_state(state, session_layer))
}
