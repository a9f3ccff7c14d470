//! Quizdeck Server - Main Entry Point
//!
//! Storage and resilience core for the realtime quiz backend.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use qz_server::alerts::{register_log_sink, AlertSink};
use qz_server::api::{create_router, AppState};
use qz_server::batcher::{AnswerBatcher, BatcherConfig};
use qz_server::breaker::BreakerConfig;
use qz_server::cache::{CacheFacade, RedisDriver};
use qz_server::config::Config;
use qz_server::observability::PerfMonitor;
use qz_server::recovery::{RecoveryWorker, SessionRecoveryService, WorkerConfig};
use qz_server::store::{MongoStore, PendingWriteQueue, StoreFacade};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qz_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Quizdeck Server"
    );

    // Alert fan-out, with the operator-log sink always attached
    let alerts = Arc::new(AlertSink::new());
    register_log_sink(&alerts);

    // Durable store
    let mongo = Arc::new(MongoStore::connect(&config.mongodb_uri).await?);
    mongo.ensure_indexes().await?;

    // Cache
    let redis = Arc::new(
        RedisDriver::connect(
            &config.redis_url,
            config.redis_password.as_deref(),
            config.redis_db,
        )
        .await?,
    );
    let cache = Arc::new(CacheFacade::new(
        Arc::clone(&redis) as Arc<dyn qz_server::cache::CacheDriver>,
        Arc::clone(&alerts),
        Duration::from_secs(config.cache_probe_interval_secs),
    ));
    cache.start_sweeper(Duration::from_secs(config.cache_sweep_interval_secs));

    // Resilience substrate
    let pending = Arc::new(PendingWriteQueue::new(Arc::clone(&cache)));
    let store = Arc::new(StoreFacade::new(
        Arc::clone(&mongo) as Arc<dyn qz_server::store::DocumentStore>,
        Arc::clone(&pending),
        Arc::clone(&alerts),
        BreakerConfig {
            failure_threshold: config.db_breaker_threshold,
            reset_timeout: Duration::from_secs(config.db_breaker_reset_secs),
        },
    ));

    let batcher = Arc::new(AnswerBatcher::new(
        Arc::clone(&mongo) as Arc<dyn qz_server::store::DocumentStore>,
        Arc::clone(&alerts),
        BatcherConfig {
            batch_size: config.batcher_batch_size,
            flush_interval: config.batcher_flush_interval(),
            max_retries: config.batcher_max_retries,
            retry_base_delay: Duration::from_millis(config.batcher_retry_base_delay_ms),
        },
    ));
    batcher.start();

    let worker = Arc::new(RecoveryWorker::new(
        Arc::clone(&mongo) as Arc<dyn qz_server::store::DocumentStore>,
        Arc::clone(&pending),
        Arc::clone(&alerts),
        WorkerConfig {
            check_interval: config.recovery_check_interval(),
            batch_size: config.recovery_batch_size,
        },
    ));
    worker.start();

    let perf = Arc::new(PerfMonitor::new());
    let session_recovery = Arc::new(SessionRecoveryService::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        Arc::clone(&perf),
    ));

    // Build application state and router
    let state = AppState {
        cache: Arc::clone(&cache),
        store,
        batcher: Arc::clone(&batcher),
        worker: Arc::clone(&worker),
        session_recovery,
        perf,
        alerts,
        config: Arc::new(config.clone()),
    };
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Orderly teardown: flush answers, stop the drain loop, stop the
    // sweeper, then drop connections.
    batcher.stop().await;
    worker.stop();
    cache.stop_sweeper();
    redis.quit().await;

    info!("Server shutdown complete");

    Ok(())
}
