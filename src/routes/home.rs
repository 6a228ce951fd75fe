//! Index page handler.
//!
//! Renders the landing page with the authenticated subject when present.
//! Each successful render also records the request's path and query as the
//! session's original path, so a later login round-trip can return the user
//! to where they started.

use axum::{
    extract::State,
    http::Uri,
    response::{Html, IntoResponse, Response},
    Extension,
};
use tracing::instrument;

use crate::error::{error_response, ErrorKind};
use crate::session::Session;
use crate::state::AppState;
use crate::templates::base_context;

/// Index page handler.
#[instrument(name = "home::index", skip_all)]
pub async fn index(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    uri: Uri,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());
    tracing::debug!(path = %path, "Recording original path");
    session.set_orig_path(path);

    let mut context = base_context(&state.config.ui);
    if let Some(subject) = session.subject() {
        context.insert("subject", &subject);
    }
    if let Some(id) = session.display_id() {
        context.insert("session_id", &id);
    }

    match state.tera.render("index.html", &context) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Template rendering failed");
            error_response(&state, session.display_id().as_deref(), ErrorKind::Misc)
        }
    }
}
