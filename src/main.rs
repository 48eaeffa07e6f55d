use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pyme_reporter::config::Config;
use pyme_reporter::db::{create_pool, run_migrations, PgUserRepository, UserRepository};
use pyme_reporter::http_client::HttpClient;
use pyme_reporter::routes::{router, AppState, SyncState};
use pyme_reporter::services::{AuthService, HealthService, UserService};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pyme_reporter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .sync_dirs
        .ensure()
        .context("Failed to create sync directories")?;

    tracing::info!("Starting PyME Reporter API...");
    tracing::info!("Connecting to database...");

    let pool = create_pool(&config.database_url, config.db_max_connections())
        .await
        .context("Database unreachable")?;
    run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;
    tracing::info!("Database connection established");

    let http = HttpClient::new(
        Duration::from_secs(config.http_timeout_secs),
        config.http_read_retries,
    )
    .context("Failed to build HTTP client")?;

    let repo: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool));
    let users = UserService::new(repo.clone());
    let auth = AuthService::with_optional_secret(
        users.clone(),
        config.jwt_secret.clone(),
        config.access_token_expire_minutes,
    )?;
    let state = AppState {
        auth,
        users,
        health: HealthService::new(repo),
        sync: SyncState::from_config(&config, http),
    };

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
