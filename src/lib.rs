//! Vestibule: a small OpenID Connect login frontend.
//!
//! Implements browser-based authorization-code login against a single
//! identity provider: redirect to the provider, validate the callback,
//! exchange the code, verify the identity assertion, and bind the verified
//! subject to a server-side session. The session's external identifier is
//! rotated at the authentication boundary to defeat session fixation.

pub mod config;
pub mod error;
pub mod middleware;
pub mod oidc;
pub mod random;
pub mod routes;
pub mod session;
pub mod state;
pub mod templates;
