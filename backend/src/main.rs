//! Credence Backend
//!
//! Authentication and session validation for the Credence platform.
//!
//! ## Architecture
//!
//! The backend follows a layered architecture:
//! - Routes: HTTP request handling and routing
//! - Auth middleware: token verification before protected handlers
//! - Services: Credential flows (register, login, refresh, rotation)
//! - Repositories: Identity data access over leased connections
//! - Database: PostgreSQL with SQLx

use anyhow::Result;
use credence_backend::{
    auth::{MemoryRevocationStore, RedisRevocationStore, RevocationStore, SharedClock, SystemClock},
    config, db, routes,
    state::AppState,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = config::AppConfig::load()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = if config::AppConfig::is_production() { "production" } else { "development" },
        "Starting Credence Backend"
    );

    // Validate production configuration
    if config::AppConfig::is_production() {
        validate_production_config(&config)?;
    }

    let metrics = init_metrics();

    // Create database pool
    info!("Connecting to database...");
    let pool = db::create_pool(&config.database).await?;

    // Run migrations (skip in production if using separate migration job)
    if !config::AppConfig::is_production() {
        db::run_migrations(&pool).await?;
    }

    let database = db::Database::from_config(pool, &config.database);
    let clock: SharedClock = Arc::new(SystemClock);

    // Connect to Redis (optional - gracefully handle connection failure)
    let revocations = connect_revocations(config.redis.url.as_deref(), clock.clone()).await;

    // Create application state
    let mut state = AppState::with_clock(database.clone(), config.clone(), revocations, clock)?;
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    // Build application
    let app = routes::create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    database.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Connect the revocation set to Redis with graceful fallback
///
/// Falls back to an in-process set, which only covers this instance
async fn connect_revocations(url: Option<&str>, clock: SharedClock) -> Arc<dyn RevocationStore> {
    let Some(url) = url else {
        info!("No Redis configured, revocations are kept in memory");
        return Arc::new(MemoryRevocationStore::new(clock));
    };

    info!("Connecting to Redis...");
    match RedisRevocationStore::connect(url, clock.clone()).await {
        Ok(store) => {
            info!("Redis connection established");
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                "Failed to connect to Redis: {}. Revocations will not be shared between instances.",
                e
            );
            Arc::new(MemoryRevocationStore::new(clock))
        }
    }
}

/// Install the Prometheus recorder backing `/metrics`
fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to install metrics recorder: {}. /metrics is disabled.", e);
            None
        }
    }
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config::AppConfig::is_production() {
            "credence_backend=info,tower_http=info".into()
        } else {
            "credence_backend=debug,tower_http=debug,sqlx=warn".into()
        }
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config::AppConfig::is_production() {
        // JSON logging for production (better for log aggregation)
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        // Pretty logging for development
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Validate configuration for production deployment
fn validate_production_config(config: &config::AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    // Check JWT secret is not default
    let secret = config.jwt.secret.expose_secret();
    if secret.contains("development") || secret.len() < 32 {
        errors.push("JWT secret must be at least 32 characters and not contain 'development'");
    }

    // Check database URL is not localhost in production
    let db_url = config.database.url.expose_secret();
    if db_url.contains("localhost") || db_url.contains("127.0.0.1") {
        warn!("Database URL contains localhost - ensure this is intentional for production");
    }

    if config.redis.url.is_none() {
        warn!("No Redis configured - logout only applies to the instance that served it");
    }

    if !errors.is_empty() {
        for err in &errors {
            error!("Configuration error: {}", err);
        }
        anyhow::bail!("Invalid production configuration");
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
