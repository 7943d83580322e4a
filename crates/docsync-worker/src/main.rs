//! docsync worker.
//!
//! Keeps an Elasticsearch index and an S3-compatible object store in sync:
//! - `serve` (default): HTTP job trigger, CRUD surface and interval schedules
//! - `ingest` / `export`: run one pass and exit non-zero unless it succeeded
//! - `reset-watermark`: forget a stream's watermark

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use docsync_cloud::{
    build_s3_client, ElasticIndex, ElasticSettings, ObjectWatermarkStore, S3ObjectStore,
    S3Settings,
};
use docsync_core::{DocumentIndex, LockManager, ObjectStore, SyncStream, WatermarkStore};
use docsync_engine::{JobKind, JobRunner, SyncBackends, SyncOrchestrator};
use docsync_local::{FileLock, FileWatermarkStore};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod handlers;
mod scheduler;

use config::{Command, Config, WatermarkBackend};
use handlers::{
    delete_handler, get_all_handler, get_handler, health_handler, job_handler, save_handler,
    update_handler, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting docsync-worker v{}", env!("CARGO_PKG_VERSION"));
    info!("  Index: {} ({})", config.es_index, config.es_url);
    info!("  Object store: {}", config.s3_endpoint);
    info!("  State dir: {}", config.state_dir().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let orchestrator = Arc::new(build_orchestrator(&config, shutdown_rx.clone())?);
    let runner = JobRunner::new(orchestrator.clone());

    match config.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, runner, shutdown_rx).await,
        Command::Ingest { params } => run_once(&runner, JobKind::Ingest, &params).await,
        Command::Export { params } => run_once(&runner, JobKind::Export, &params).await,
        Command::ResetWatermark { stream } => {
            let stream = SyncStream::from(stream);
            orchestrator.watermarks().reset(stream).await?;
            info!("Watermark for {} reset", stream);
            Ok(())
        }
    }
}

fn build_orchestrator(
    config: &Config,
    interrupt: watch::Receiver<bool>,
) -> anyhow::Result<SyncOrchestrator> {
    let s3_client = build_s3_client(&S3Settings {
        endpoint: config.s3_endpoint.clone(),
        region: config.s3_region.clone(),
        access_key_id: config.s3_access_key_id.clone(),
        secret_access_key: config.s3_secret_access_key.clone(),
    });
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(s3_client));

    let index: Arc<dyn DocumentIndex> = Arc::new(ElasticIndex::new(ElasticSettings {
        url: config.es_url.clone(),
        index: config.es_index.clone(),
        username: config.es_username.clone(),
        password: config.es_password.clone(),
    }));

    let state_dir = config.state_dir();
    let watermarks: Arc<dyn WatermarkStore> = match config.watermark_backend {
        WatermarkBackend::File => Arc::new(FileWatermarkStore::new(state_dir.join("watermarks"))),
        WatermarkBackend::Object => Arc::new(ObjectWatermarkStore::new(
            store.clone(),
            config.watermark_bucket.clone(),
            &config.watermark_prefix,
        )),
    };
    info!("  Watermarks: {}", watermarks.backend_name());

    let locks: Arc<dyn LockManager> = Arc::new(FileLock::new(&state_dir));

    let backends = SyncBackends {
        index,
        store,
        watermarks,
        locks,
    };
    Ok(SyncOrchestrator::new(backends, config.sync_settings()?).with_interrupt(interrupt))
}

async fn run_once(runner: &JobRunner, kind: JobKind, params: &str) -> anyhow::Result<()> {
    let result = runner.run(kind, params).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!("{} job did not succeed: {}", kind, result.message);
    }
    Ok(())
}

async fn serve(
    config: &Config,
    runner: JobRunner,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut schedules = Vec::new();
    for (kind, bucket, every) in [
        (
            JobKind::Ingest,
            &config.ingest_bucket,
            config.ingest_interval_secs,
        ),
        (
            JobKind::Export,
            &config.export_bucket,
            config.export_interval_secs,
        ),
    ] {
        match (bucket, every) {
            (_, 0) => {}
            (Some(bucket), secs) => schedules.push(scheduler::spawn_interval_job(
                runner.clone(),
                kind,
                bucket.clone(),
                Duration::from_secs(secs),
                shutdown.clone(),
            )),
            (None, _) => warn!("  {} interval set without a bucket, not scheduling", kind),
        }
    }

    let state = AppState {
        index: runner.orchestrator().index().clone(),
        runner,
        list_limit: config.list_limit,
    };

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/save", post(save_handler))
        .route("/update", post(update_handler))
        .route("/getAll", get(get_all_handler))
        .route("/jobs/{kind}", post(job_handler))
        .route("/{id}", get(get_handler).delete(delete_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let mut stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stop| *stop).await;
        })
        .await?;

    for schedule in schedules {
        if let Err(e) = schedule.await {
            warn!("Schedule task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
