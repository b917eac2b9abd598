//! User Management Service
//! Mission: Serve registration, login, RBAC, groups and the activity trail

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_management::{
    auth::{Credentials, JwtHandler},
    config::{load_env, Config},
    middleware::RateLimiter,
    store::{seed_admin, Repository, SqliteStore},
    router, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let config = Config::parse();

    info!("🚀 User management service starting");

    let store = SqliteStore::open(&config.database_path, config.db_timeout())
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    let store: Arc<dyn Repository> = Arc::new(store);
    info!("📊 Database initialized at: {}", config.database_path);

    let credentials = Credentials::new(config.bcrypt_cost);
    let created = seed_admin(
        store.as_ref(),
        &credentials,
        &config.admin_email,
        &config.admin_password,
    )
    .await
    .context("Failed to seed admin account")?;
    if created && config.admin_password == "admin123" {
        warn!("⚠️  Admin account uses the default password - CHANGE IT IN PRODUCTION!");
    }

    let (secret, is_dev_secret) = config.jwt_secret();
    if is_dev_secret {
        warn!("⚠️  JWT_SECRET not set - using an insecure development secret");
    }
    let jwt = JwtHandler::new(secret, config.token_ttl());
    info!("🔐 Tokens valid for {}h", config.token_ttl().num_hours());

    let limiter = RateLimiter::new(config.rate_limit());
    let _sweeper = limiter.spawn_sweeper(config.sweep_interval());
    info!(
        "🚦 Rate limit: {} requests per {:?} per client",
        limiter.config().max_requests,
        limiter.config().window
    );

    let state = AppState::new(store, jwt, credentials);
    let app = router(state, limiter);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("👋 Server stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_management=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
