//! Login flow handlers: the authentication session state machine.
//!
//! Routes:
//! - GET /login/init - generate state/nonce and redirect to the provider
//! - GET /login/callback - validate the provider's response and bind the
//!   verified subject to the session
//!
//! The callback is a sequence of hard gates; the first failing gate aborts
//! the request with its classification and the remaining steps never run.
//! Immediately before the subject is bound, the session's external
//! identifier is rotated to invalidate anything an attacker may have
//! fixated pre-authentication.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::instrument;

use crate::config::STATE_NONCE_BYTES;
use crate::error::{error_response, FlowError};
use crate::random::random_string;
use crate::session::Session;
use crate::state::AppState;

/// Query parameters from the identity-provider callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// 302 redirect. The provider round-trip uses Found rather than the
/// axum default of 303.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Log the failure with its classification and render the matching page.
fn reject(app: &AppState, session: &Session, err: FlowError) -> Response {
    let kind = err.kind();
    tracing::error!(error = %err, kind = kind.label(), "Login flow rejected");
    error_response(app, session.display_id().as_deref(), kind)
}

/// Initiate the login flow: store a fresh state/nonce pair and redirect to
/// the provider's authorization endpoint.
#[instrument(name = "auth::init", skip_all)]
pub async fn init(
    State(app): State<AppState>,
    axum::Extension(session): axum::Extension<Session>,
) -> Response {
    match begin_login(&app, &session) {
        Ok(auth_url) => found(&auth_url),
        Err(err) => reject(&app, &session, err),
    }
}

fn begin_login(app: &AppState, session: &Session) -> Result<String, FlowError> {
    let state = random_string(STATE_NONCE_BYTES, true)?;
    let nonce = random_string(STATE_NONCE_BYTES, true)?;

    session.begin_login(state.clone(), nonce.clone());

    Ok(app.provider.authorization_url(&state, &nonce))
}

/// Identity-provider callback: validate, exchange, verify, rotate, bind.
#[instrument(name = "auth::callback", skip_all)]
pub async fn callback(
    State(app): State<AppState>,
    axum::Extension(session): axum::Extension<Session>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match run_callback(&app, &session, &query).await {
        Ok(target) => found(&target),
        Err(err) => reject(&app, &session, err),
    }
}

async fn run_callback(
    app: &AppState,
    session: &Session,
    query: &CallbackQuery,
) -> Result<String, FlowError> {
    // Gate 1: the state echoed by the provider must equal the stored one,
    // and the pair must not already have completed a callback.
    let stored_state = session.state();
    if stored_state.is_none() || stored_state != query.state || session.flow_consumed() {
        return Err(FlowError::StateMismatch);
    }

    // Gate 2: a non-empty authorization code must be present.
    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(FlowError::MissingCode)?;

    // Gate 3: exchange the code for a token bundle.
    let token = app
        .provider
        .exchange_code(code)
        .await
        .map_err(FlowError::Exchange)?;

    // Gate 4: the bundle must carry an ID token.
    let raw_id_token = token.id_token.clone().ok_or(FlowError::MissingIdToken)?;

    // Gate 5: verify signature, issuer, and audience.
    let claims = app
        .provider
        .verify_id_token(&raw_id_token)
        .map_err(FlowError::Verification)?;

    // Gate 6: the signed nonce claim must equal the session nonce.
    if claims.nonce.is_none() || claims.nonce != session.nonce() {
        return Err(FlowError::NonceMismatch);
    }

    // Gate 7: rotate the external identifier before anything privileged is
    // stored. On failure the session is destroyed, not retried.
    if let Err(e) = app.sessions.renew_identifier(session).await {
        tracing::error!(error = %e, "Failed to renew session identifier");
        app.sessions.destroy(session).await;
        return Err(FlowError::Renewal(e));
    }

    // Store the bundle; the token is not yet used.
    session.set_token(token);

    // Gates 8-9: resolve the subject via the userinfo endpoint.
    let subject = fetch_subject(app, session).await?;
    tracing::info!(subject = %subject, "Authenticated user");
    session.set_subject(subject);

    // Gate 10: post-auth consistency check against a fresh userinfo query.
    verify_authenticated_session(app, session).await?;
    session.consume_flow();

    Ok(session.orig_path_or_root())
}

/// Query the provider's userinfo endpoint with the stored token.
async fn fetch_subject(app: &AppState, session: &Session) -> Result<String, FlowError> {
    let token = session.token().ok_or(FlowError::MissingToken)?;

    app.provider
        .userinfo_subject(&token)
        .await
        .map_err(FlowError::Subject)
}

/// Re-derivable post-condition on an authenticated session: subject, state,
/// and nonce must all be present, and a fresh userinfo query must agree with
/// the stored subject.
async fn verify_authenticated_session(app: &AppState, session: &Session) -> Result<(), FlowError> {
    let stored_subject = match session.subject() {
        Some(subject) if !subject.is_empty() => subject,
        _ => return Err(FlowError::IncompleteSession),
    };
    if session.state().is_none() || session.nonce().is_none() {
        return Err(FlowError::IncompleteSession);
    }

    let fresh_subject = fetch_subject(app, session).await?;
    if fresh_subject != stored_subject {
        tracing::warn!(
            subject_session = %stored_subject,
            subject_userinfo = %fresh_subject,
            "Privileged action attempted with mismatching subject"
        );
        return Err(FlowError::SubjectMismatch);
    }

    Ok(())
}
