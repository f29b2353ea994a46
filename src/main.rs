mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{middleware, routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::convert::{Converter, ScriptConverter};
use services::model::ModelClient;
use services::pipeline::JobOrchestrator;
use services::runner::PipelineRunner;
use services::storage::BlobStore;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing medseg-backend server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "segmentation_jobs_total",
        "Total segmentation jobs submitted"
    );
    metrics::describe_counter!(
        "segmentation_jobs_completed",
        "Total segmentation jobs completed"
    );
    metrics::describe_counter!(
        "segmentation_jobs_failed",
        "Total segmentation jobs that failed"
    );
    metrics::describe_histogram!(
        "segmentation_pipeline_seconds",
        "Time to run one segmentation pipeline"
    );
    metrics::describe_gauge!(
        "segmentation_queue_depth",
        "Jobs queued for a pipeline worker"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize object storage client and provision the bucket
    tracing::info!("Initializing object storage client");
    let storage = BlobStore::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        config.storage_use_tls,
    )
    .expect("Failed to initialize storage client");
    storage
        .ensure_bucket()
        .await
        .expect("Failed to provision storage bucket");
    let storage = Arc::new(storage);

    // Initialize the external converter and model clients
    let converter: Arc<dyn Converter> = Arc::new(ScriptConverter::new(
        &config.converter_interpreter,
        &config.converter_script,
        &config.scratch_dir,
    ));
    let model = Arc::new(ModelClient::new(&config.model_url, &config.scratch_dir));

    // Wire the orchestrator to a bounded worker pool
    let (job_tx, job_rx) = mpsc::channel(config.pipeline_queue_depth);
    let orchestrator = Arc::new(JobOrchestrator::new(
        db_pool.clone(),
        storage.clone(),
        converter.clone(),
        model,
        config.scratch_dir.clone(),
        job_tx,
    ));

    let shutdown = CancellationToken::new();
    let runner = PipelineRunner::spawn(
        orchestrator.clone(),
        job_rx,
        config.pipeline_workers,
        shutdown.clone(),
    );

    // Create shared application state
    let state = AppState::new(
        db_pool,
        storage,
        converter,
        orchestrator,
        config.jwt_secret.clone(),
        config.scratch_dir.clone(),
    );

    // Protected API routes: identity is checked by the bearer middleware
    let api = Router::new()
        .route("/api/upload", post(routes::processing::upload_image))
        .route("/api/results/{id}", get(routes::processing::get_result))
        .route(
            "/api/results/{id}/download",
            get(routes::processing::download_result),
        )
        .route("/api/history", get(routes::processing::get_history))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::auth::require_auth,
        ));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(api)
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting medseg-backend on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Stop accepting new pipelines and drain the in-flight ones
    tracing::info!("Shutting down, draining pipeline workers");
    runner.shutdown().await;
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
}
