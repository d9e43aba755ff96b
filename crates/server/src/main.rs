//! tubewatch server entry point.

mod app;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubewatch_common::Config;
use tubewatch_common::config::StoreBackend;
use tubewatch_queue::{
    ContentStore, Dispatcher, HandlerContext, HandlerRegistry, JobStore, MemoryStore, RpcStore,
    RpcStoreConfig, Scheduler, SchedulerConfig,
};
use tubewatch_youtube::{ApiClient, ApiClientConfig, QuotaConfig, QuotaManager, RetryPolicy};
use uuid::Uuid;

use crate::app::AppState;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let json = std::env::var("TUBEWATCH_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubewatch=debug,tower_http=debug".into()),
        )
        .init();
}

fn build_stores(config: &Config) -> anyhow::Result<(Arc<dyn JobStore>, Arc<dyn ContentStore>)> {
    let lease = Duration::from_secs(config.store.lease_secs);

    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, jobs will not survive a restart");
            let store = Arc::new(MemoryStore::new().with_lease(lease));
            Ok((store.clone(), store))
        }
        StoreBackend::Rpc => {
            let (Some(url), Some(service_key)) = (&config.store.url, &config.store.service_key)
            else {
                bail!("store.url and store.service_key are required for the rpc backend");
            };
            let store = Arc::new(RpcStore::new(RpcStoreConfig {
                url: url.clone(),
                service_key: service_key.clone(),
                lease,
                timeout: Duration::from_secs(config.youtube.request_timeout_secs),
            })?);
            info!(%url, "Using RPC store");
            Ok((store.clone(), store))
        }
    }
}

fn build_api_client(config: &Config) -> anyhow::Result<ApiClient> {
    let youtube = &config.youtube;
    if youtube.api_key.is_empty() {
        warn!("youtube.api_key is empty, Data API calls will be rejected upstream");
    }

    let client = ApiClient::new(ApiClientConfig {
        base_url: youtube.base_url.clone(),
        api_key: youtube.api_key.clone(),
        timeout: Duration::from_secs(youtube.request_timeout_secs),
        batch_size: youtube.batch_size,
        retry: RetryPolicy {
            max_retries: youtube.max_retries,
            base_delay: Duration::from_millis(youtube.base_delay_ms),
            jitter: youtube.jitter,
        },
        ..ApiClientConfig::default()
    })?;
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting tubewatch server...");

    let config = Config::load().context("failed to load configuration")?;

    let (jobs, content) = build_stores(&config)?;
    let api = build_api_client(&config)?;
    let quota = Arc::new(QuotaManager::new(QuotaConfig {
        capacity: config.quota.capacity,
        refill_amount: config.quota.refill_amount,
        refill_interval: Duration::from_secs(config.quota.refill_interval_secs),
    }));

    let registry = HandlerRegistry::new(HandlerContext {
        api,
        quota: quota.clone(),
        content: content.clone(),
        jobs: jobs.clone(),
        feed_base_url: config.youtube.feed_base_url.clone(),
    });

    let worker_id = config
        .worker
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("tubewatch-{}", Uuid::new_v4()));
    let dispatcher = Dispatcher::new(jobs.clone(), Arc::new(registry), worker_id);

    if config.worker.enabled {
        worker::spawn(
            dispatcher.clone(),
            Duration::from_secs(config.worker.interval_secs),
            config.worker.max_jobs,
        );
    }

    if config.scheduler.enabled {
        let settings = &config.scheduler;
        let scheduler = Arc::new(Scheduler::new(
            jobs,
            content,
            SchedulerConfig {
                hot_videos_interval: Duration::from_secs(settings.hot_videos_interval_secs),
                medium_videos_interval: Duration::from_secs(settings.medium_videos_interval_secs),
                channel_stats_interval: Duration::from_secs(settings.channel_stats_interval_secs),
                feed_check_interval: Duration::from_secs(settings.feed_check_interval_secs),
            },
        ));
        scheduler.spawn();
        info!("Scheduler started");
    }

    let app = app::router(AppState { dispatcher, quota });

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
