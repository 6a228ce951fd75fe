//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! HTTP cache headers, token sizes, default paths, and the session cookie.
//! `AppConfig` is the root configuration struct containing all settings.

use const_format::formatcp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Static assets (CSS, JS) - long cache with immutable hint
pub const HTTP_CACHE_STATIC_MAX_AGE: u32 = 86400;

pub const CACHE_CONTROL_STATIC: &str =
    formatcp!("public, max-age={}, immutable", HTTP_CACHE_STATIC_MAX_AGE);

/// Auth and index responses are per-session and must never be cached.
pub const CACHE_CONTROL_NO_STORE: &str = "no-store";

// =============================================================================
// Token Sizes
// =============================================================================

/// Bytes of entropy for the OAuth2 `state` and OIDC `nonce` values
pub const STATE_NONCE_BYTES: usize = 16;

/// Bytes of entropy for the per-session display/correlation identifier
pub const DISPLAY_ID_BYTES: usize = 12;

/// Bytes of entropy for the session cookie identifier
pub const SESSION_ID_BYTES: usize = 32;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "vestibule=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Name of the session cookie holding the opaque store identifier
pub const SESSION_COOKIE: &str = "vestibule_session";

/// Path the identity provider redirects back to
pub const CALLBACK_PATH: &str = "/login/callback";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    pub http: HttpServerConfig,
    /// Identity provider settings
    pub oidc: OidcConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ui: UiConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

/// Identity provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Issuer base URL used for .well-known discovery
    pub issuer_url: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Externally visible base URL for the callback redirect.
    /// Falls back to `http://{host}:{port}` when unset.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    /// Directory holding `templates/` and `static/`
    #[serde(default = "AssetConfig::default_dir")]
    pub dir: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
        }
    }
}

impl AssetConfig {
    fn default_dir() -> String {
        "assets".to_string()
    }

    /// Glob pattern for Tera template loading
    pub fn template_glob(&self) -> String {
        format!("{}/templates/**/*", self.dir)
    }

    /// Directory served under /static
    pub fn static_dir(&self) -> PathBuf {
        Path::new(&self.dir).join("static")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle lifetime of a session in seconds (default: 3 minutes)
    #[serde(default = "SessionConfig::default_lifetime")]
    pub lifetime_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_seconds: Self::default_lifetime(),
        }
    }
}

impl SessionConfig {
    fn default_lifetime() -> u64 {
        180
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UiConfig {
    /// Site title shown in the header and page titles
    pub site_name: Option<String>,
    /// Version string, populated at runtime
    #[serde(skip_deserializing, default = "UiConfig::default_version")]
    pub version: String,
}

impl UiConfig {
    fn default_version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;

        if config.oidc.issuer_url.is_empty() {
            return Err(ConfigError::Validation(
                "oidc.issuer_url must not be empty".to_string(),
            ));
        }
        if config.oidc.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "oidc.client_id must not be empty".to_string(),
            ));
        }
        if config.oidc.client_secret.is_empty() {
            return Err(ConfigError::Validation(
                "oidc.client_secret must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    /// Base URL for building the callback redirect, falling back to the bind address.
    pub fn external_base_url(&self) -> String {
        match &self.oidc.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.http.host, self.http.port),
        }
    }

    /// Full redirect URL registered with the identity provider.
    pub fn redirect_url(&self) -> String {
        format!("{}{}", self.external_base_url(), CALLBACK_PATH)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
