//! Session initialization middleware.
//!
//! Runs before route dispatch on every request: loads the session named by
//! the cookie (creating one when absent or expired), ensures the session has
//! a display identifier, and opens a tracing span carrying `session_id` so
//! all logs within the request correlate to one browser. After the handler
//! runs, mutations are persisted and the cookie is set when the identifier
//! is new or was rotated.
//!
//! The display identifier is independent of the cookie identifier and is
//! only ever used for logging and page display.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use http::header::{HeaderValue, SET_COOKIE};
use time::Duration as TimeDuration;
use tracing::Instrument;

use crate::config::{DISPLAY_ID_BYTES, SESSION_COOKIE};
use crate::error::{error_response, ErrorKind};
use crate::random::random_string;
use crate::state::AppState;

/// Middleware that binds a server-side session to the request.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including other middleware and handlers.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let session = match state.sessions.load_or_create(cookie_id.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Session creation failed");
            return error_response(&state, None, ErrorKind::Misc);
        }
    };

    let had_display_id = session.display_id().is_some();
    if !had_display_id {
        match random_string(DISPLAY_ID_BYTES, false) {
            Ok(id) => session.set_display_id(id),
            Err(e) => {
                tracing::error!(error = %e, "Session ID generation failed");
                return error_response(&state, None, ErrorKind::Misc);
            }
        }
    }
    let display_id = session.display_id().unwrap_or_default();

    let method = request.method().clone();
    let uri = request.uri().clone();

    // Create the request span with key fields for correlation
    let span = tracing::info_span!(
        "request",
        session_id = %display_id,
        method = %method,
        path = %uri.path(),
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    request.extensions_mut().insert(session.clone());

    async move {
        if !had_display_id {
            tracing::debug!("Initialized session");
        }

        let mut response = next.run(request).await;

        state.sessions.persist(&session).await;

        if session.is_destroyed() {
            let removal = Cookie::build((SESSION_COOKIE, ""))
                .path("/")
                .http_only(true)
                .max_age(TimeDuration::ZERO)
                .build();
            append_cookie(&mut response, &removal);
        } else if session.needs_cookie() {
            let lifetime = state.config.session.lifetime_seconds;
            let cookie = Cookie::build((SESSION_COOKIE, session.id()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(TimeDuration::seconds(lifetime as i64))
                .build();
            append_cookie(&mut response, &cookie);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}

fn append_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode session cookie"),
    }
}
