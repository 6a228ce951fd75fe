//! Vestibule: a small OpenID Connect login frontend.
//!
//! This is the application entry point. It initializes tracing, loads
//! configuration from TOML files, discovers the identity provider (a fatal
//! error when unreachable - a misconfigured auth service should not serve
//! half-broken), sets up the Axum router, and starts the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vestibule::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use vestibule::oidc::OidcProvider;
use vestibule::routes::create_router;
use vestibule::session::SessionStore;
use vestibule::state::AppState;
use vestibule::templates::init_templates;

/// Vestibule: a small OpenID Connect login frontend
#[derive(Parser, Debug)]
#[command(name = "vestibule", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "vestibule=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = AppConfig::load(&args.config)?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Loaded configuration");

    // Initialize Tera templates
    let tera = init_templates(&config.assets.template_glob())?;
    tracing::info!("Initialized templates");

    // Server-side session store with idle expiry
    let sessions = SessionStore::new(Duration::from_secs(config.session.lifetime_seconds));

    // Discover the identity provider; failure here terminates the process
    tracing::info!(issuer = %config.oidc.issuer_url, "Discovering identity provider");
    let provider = OidcProvider::discover(&config.oidc, &config.redirect_url()).await?;
    tracing::info!(redirect_url = %config.redirect_url(), "Identity provider ready");

    // Create application state
    let state = AppState::new(config.clone(), tera, sessions, Arc::new(provider));

    // Create router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
