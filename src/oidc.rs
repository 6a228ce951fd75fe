//! OpenID Connect provider client.
//!
//! `IdentityProvider` is the seam between the login flow and the identity
//! provider: authorization-URL construction, code-for-token exchange,
//! ID-token verification, and userinfo subject lookup. The production
//! implementation (`OidcProvider`) is backed by the `openidconnect` crate
//! with endpoints auto-discovered via .well-known/openid-configuration.
//! Discovery happens once at startup; a provider that cannot be discovered
//! is a fatal boot error.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata, CoreUserInfoClaims,
};
use openidconnect::{
    AccessToken, AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce,
    OAuth2TokenResponse, RedirectUrl, Scope, TokenResponse,
};

use crate::config::OidcConfig;

/// Request timeout for all provider calls (discovery, exchange, userinfo).
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("ID token verification failed: {0}")]
    Verification(String),

    #[error("Failed to fetch user info: {0}")]
    UserInfo(String),

    #[error("Provider returned an empty subject")]
    MissingSubject,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Token bundle from a successful authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: String,
    /// Raw ID token JWT, when the provider issued one.
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Claims extracted from a verified ID token.
#[derive(Debug, Clone)]
pub struct IdTokenClaims {
    pub subject: String,
    pub nonce: Option<String>,
}

/// Contract between the login flow and the identity provider.
///
/// The flow owns the state/nonce lifecycle and all validation gates; the
/// provider only supplies protocol operations. Integration tests substitute
/// a stub implementation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the authorization URL embedding the given state and nonce.
    fn authorization_url(&self, state: &str, nonce: &str) -> String;

    /// Exchange an authorization code for a token bundle.
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, ProviderError>;

    /// Verify an ID token's signature, issuer, and audience against the
    /// discovered provider keys, returning its claims. The nonce comparison
    /// stays with the caller.
    fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, ProviderError>;

    /// Query the userinfo endpoint for the subject behind a token.
    async fn userinfo_subject(&self, token: &TokenBundle) -> Result<String, ProviderError>;
}

/// OIDC client with endpoints set from discovered provider metadata.
type ConfiguredCoreClient = openidconnect::Client<
    openidconnect::EmptyAdditionalClaims,
    openidconnect::core::CoreAuthDisplay,
    openidconnect::core::CoreGenderClaim,
    openidconnect::core::CoreJweContentEncryptionAlgorithm,
    openidconnect::core::CoreJsonWebKey,
    openidconnect::core::CoreAuthPrompt,
    openidconnect::StandardErrorResponse<openidconnect::core::CoreErrorResponseType>,
    openidconnect::core::CoreTokenResponse,
    openidconnect::core::CoreTokenIntrospectionResponse,
    openidconnect::core::CoreRevocableToken,
    openidconnect::core::CoreRevocationErrorResponse,
    openidconnect::EndpointSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointMaybeSet,
    openidconnect::EndpointMaybeSet,
>;

/// Production provider client backed by `openidconnect`.
pub struct OidcProvider {
    client: ConfiguredCoreClient,
    http_client: reqwest::Client,
}

impl OidcProvider {
    /// Discover the provider's endpoints and signing keys, and configure the
    /// client with the given redirect URL.
    pub async fn discover(config: &OidcConfig, redirect_url: &str) -> Result<Self, ProviderError> {
        let issuer_url = IssuerUrl::new(config.issuer_url.clone())
            .map_err(|e| ProviderError::InvalidUrl(format!("issuer URL: {e}")))?;
        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| ProviderError::InvalidUrl(format!("redirect URL: {e}")))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to create HTTP client: {e}")))?;

        let metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| ProviderError::Discovery(e.to_string()))?;

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
        )
        .set_redirect_uri(redirect_url);

        Ok(Self {
            client,
            http_client,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorization_url(&self, state: &str, nonce: &str) -> String {
        let state = state.to_string();
        let nonce = nonce.to_string();

        let (auth_url, _csrf, _nonce) = self
            .client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || CsrfToken::new(state),
                move || Nonce::new(nonce),
            )
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .url();

        auth_url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, ProviderError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::TokenExchange(format!("no token endpoint: {e}")))?
            .request_async(&self.http_client)
            .await
            .map_err(|e| ProviderError::TokenExchange(e.to_string()))?;

        Ok(TokenBundle {
            access_token: response.access_token().secret().clone(),
            id_token: response.id_token().map(|t| t.to_string()),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in(),
        })
    }

    fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, ProviderError> {
        let id_token = CoreIdToken::from_str(raw)
            .map_err(|e| ProviderError::Verification(format!("malformed ID token: {e}")))?;

        // The nonce claim is compared against the session by the login flow,
        // where a mismatch gets its own classification.
        let claims = id_token
            .claims(&self.client.id_token_verifier(), |_: Option<&Nonce>| Ok(()))
            .map_err(|e| ProviderError::Verification(e.to_string()))?;

        Ok(IdTokenClaims {
            subject: claims.subject().as_str().to_string(),
            nonce: claims.nonce().map(|n| n.secret().clone()),
        })
    }

    async fn userinfo_subject(&self, token: &TokenBundle) -> Result<String, ProviderError> {
        let claims: CoreUserInfoClaims = self
            .client
            .user_info(AccessToken::new(token.access_token.clone()), None)
            .map_err(|e| ProviderError::UserInfo(format!("no userinfo endpoint: {e}")))?
            .request_async(&self.http_client)
            .await
            .map_err(|e| ProviderError::UserInfo(e.to_string()))?;

        let subject = claims.subject().as_str().to_string();
        if subject.is_empty() {
            return Err(ProviderError::MissingSubject);
        }

        Ok(subject)
    }
}
