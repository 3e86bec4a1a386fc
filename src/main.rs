//! Photo Match Service
//!
//! Face-match statistics and update flow behind a REST (Axum) API:
//! stats aggregation with a TTL cache, match check/update against a face
//! index, and a sign-in notifier that triggers background updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use photomatch::config::Config;
use photomatch::cache::MemoryStatsCache;
use photomatch::service::{MatchService, SignInChecker, SignInFlow, UpdateWorker};
use photomatch::storage::SqliteStorage;
use photomatch::api::rest::{AppState, create_rest_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting Photo Match Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });
    config.apply_env_overrides();

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Cache TTL: {}s", config.cache.ttl_secs);
    info!("  Check threshold: {}", config.matching.check_threshold);
    info!("  Update threshold: {}", config.matching.update_threshold);
    info!("  Sign-in check timeout: {}ms", config.signin.check_timeout_ms);

    // Initialize storage
    let storage_path = config.storage.sqlite_path.as_deref()
        .map(|p| p.to_str().unwrap())
        .unwrap_or("data/matches.db");

    let storage = Arc::new(SqliteStorage::new(storage_path).await?);
    info!("SQLite storage initialized at: {}", storage_path);

    // Stats cache with background sweep
    let cache = Arc::new(MemoryStatsCache::new(
        Duration::from_secs(config.cache.ttl_secs),
        Duration::from_secs(config.cache.sweep_interval_secs),
    ));
    let cache_task = cache.clone();
    tokio::spawn(async move {
        cache_task.start_sweep_task().await;
    });

    // Match service over storage + index (both SQLite-backed)
    let service = Arc::new(MatchService::new(
        storage.clone(),
        storage.clone(),
        cache.clone(),
        config.matching.clone(),
    ));

    // Background update worker and event channel
    let (events, _) = broadcast::channel(64);
    let shutdown = Arc::new(Notify::new());
    let (updates, worker) = UpdateWorker::new(
        service.clone(),
        events.clone(),
        shutdown.clone(),
        config.signin.update_queue_depth,
    );
    tokio::spawn(worker.run());

    // Sign-in flow
    let checker = Arc::new(SignInChecker::new(
        service.clone(),
        Duration::from_secs(config.signin.update_interval_hours * 3600),
    ));
    let signin = Arc::new(SignInFlow::new(
        checker,
        updates,
        events.clone(),
        Duration::from_millis(config.signin.check_timeout_ms),
    ));

    // Create REST app state
    let app_state = Arc::new(AppState {
        service,
        signin,
        debug_errors: config.server.debug_errors,
        start_time: Instant::now(),
    });

    let router = create_rest_router(app_state);

    // Start REST server
    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("REST API listening on http://{}", addr);

    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    info!("Photo Match Service is ready!");
    info!("Health: http://localhost:{}/health", config.server.port);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    shutdown.notify_one();
    cache.shutdown();

    info!("Goodbye!");
    Ok(())
}
