//! Error classification and response mapping for the login flow.
//!
//! Every failure in the flow is folded into a coarse six-kind classification
//! so that provider internals never reach the browser. Each kind maps to an
//! explicit status and a fixed-content error page; details go to the
//! structured log only, correlated by the display session id.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::oidc::ProviderError;
use crate::random::EntropyError;
use crate::state::AppState;

/// Coarse classification of login-flow failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Internal or unexpected failure
    Misc,
    /// Missing or invalid authorization code
    Code,
    /// State value missing or mismatching
    State,
    /// Token value issues (reserved)
    Token,
    /// Missing required query parameter (reserved)
    Param,
    /// Operation against data not owned by the requesting identity
    Illegal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Misc => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Illegal => StatusCode::FORBIDDEN,
            ErrorKind::Code | ErrorKind::State | ErrorKind::Token | ErrorKind::Param => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// Template rendered for this kind.
    fn template(self) -> &'static str {
        match self {
            ErrorKind::Misc => "internal_error.html",
            _ => "bad_state.html",
        }
    }

    /// Short fixed message shown to the user. Never includes provider
    /// or internal details.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Misc => "Something went wrong on our side. Please try again later.",
            ErrorKind::Code => "The login response was missing its authorization code.",
            ErrorKind::State => "The login attempt could not be validated. Please try again.",
            ErrorKind::Token => "The login token was not accepted. Please try again.",
            ErrorKind::Param => "A required parameter was missing from the request.",
            ErrorKind::Illegal => "This action is not permitted for the signed-in identity.",
        }
    }

    /// Stable label used in log fields.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Misc => "misc",
            ErrorKind::Code => "code",
            ErrorKind::State => "state",
            ErrorKind::Token => "token",
            ErrorKind::Param => "param",
            ErrorKind::Illegal => "illegal",
        }
    }
}

/// Failures of the login-flow state machine, one variant per gate.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("state missing, mismatching, or already consumed")]
    StateMismatch,

    #[error("missing authorization code")]
    MissingCode,

    #[error("token exchange failed: {0}")]
    Exchange(ProviderError),

    #[error("token response carried no id_token")]
    MissingIdToken,

    #[error("ID token verification failed: {0}")]
    Verification(ProviderError),

    #[error("ID token nonce does not match session nonce")]
    NonceMismatch,

    #[error("session identifier renewal failed: {0}")]
    Renewal(EntropyError),

    #[error("subject query attempted without a stored token")]
    MissingToken,

    #[error("subject query failed: {0}")]
    Subject(ProviderError),

    #[error("authenticated session is missing subject, state, or nonce")]
    IncompleteSession,

    #[error("session subject does not match provider subject")]
    SubjectMismatch,

    #[error(transparent)]
    Entropy(#[from] EntropyError),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::StateMismatch => ErrorKind::State,
            FlowError::MissingCode => ErrorKind::Code,
            FlowError::IncompleteSession => ErrorKind::State,
            FlowError::SubjectMismatch => ErrorKind::Illegal,
            FlowError::Exchange(_)
            | FlowError::MissingIdToken
            | FlowError::Verification(_)
            | FlowError::NonceMismatch
            | FlowError::Renewal(_)
            | FlowError::MissingToken
            | FlowError::Subject(_)
            | FlowError::Entropy(_) => ErrorKind::Misc,
        }
    }
}

/// Render the error page for a kind, echoing the display session id for
/// correlation when available.
pub fn error_response(state: &AppState, session_id: Option<&str>, kind: ErrorKind) -> Response {
    let status = kind.status();

    let mut context = crate::templates::base_context(&state.config.ui);
    context.insert("error", kind.message());
    if let Some(id) = session_id {
        context.insert("session_id", id);
    }

    match state.tera.render(kind.template(), &context) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, kind = kind.label(), "Failed to render error page");
            // Fallback matching the structure of the error templates.
            let body = format!(
                r#"<!DOCTYPE html>
<html>
<head>
    <title>Error {}</title>
    <link rel="stylesheet" href="/static/css/style.css">
</head>
<body>
    <div class="container">
        <div class="error-page">
            <h1>Error {}</h1>
            <p>{}</p>
            <a href="/">Return to homepage</a>
        </div>
    </div>
</body>
</html>"#,
                status.as_u16(),
                status.as_u16(),
                kind.message()
            );
            (status, Html(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_explicit_statuses() {
        assert_eq!(ErrorKind::Misc.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::State.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Code.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Token.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Param.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Illegal.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn flow_errors_classify_per_gate() {
        assert_eq!(FlowError::StateMismatch.kind(), ErrorKind::State);
        assert_eq!(FlowError::MissingCode.kind(), ErrorKind::Code);
        assert_eq!(FlowError::NonceMismatch.kind(), ErrorKind::Misc);
        assert_eq!(FlowError::MissingIdToken.kind(), ErrorKind::Misc);
        assert_eq!(FlowError::IncompleteSession.kind(), ErrorKind::State);
        assert_eq!(FlowError::SubjectMismatch.kind(), ErrorKind::Illegal);
    }

    #[test]
    fn messages_do_not_leak_internals() {
        for kind in [
            ErrorKind::Misc,
            ErrorKind::Code,
            ErrorKind::State,
            ErrorKind::Token,
            ErrorKind::Param,
            ErrorKind::Illegal,
        ] {
            let message = kind.message();
            assert!(!message.is_empty());
            assert!(!message.contains("error:"), "no nested error text");
        }
    }
}
