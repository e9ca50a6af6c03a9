use anyhow::Context;
use clap::Parser;
use seqd_server::server::{
    backend::{mysql::MysqlCounter, redis::RedisBuffer},
    config::{CliArgs, ServerConfig},
    connection::listener::Listener,
    engine::Engine,
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let buffer = RedisBuffer::connect(
        &config.fast_store_url,
        config.fast_store_pool_size,
        config.key_namespace.as_str(),
    )
    .await
    .context("failed to set up the fast store pool")?;

    let counter = MysqlCounter::connect(
        &config.durable_store_dsn,
        config.durable_store_pool_size,
        &config.durable_table,
    )
    .await
    .context("failed to connect to the durable store")?;

    let listener = Listener::bind(config.listen_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let engine = Arc::new(Engine::new(
        Arc::new(buffer),
        Arc::new(counter),
        config.engine.clone(),
    ));

    let result = tokio::select! {
        served = listener.serve(engine) => match served {
            Ok(never) => match never {},
            Err(e) => Err(anyhow::Error::new(e).context("listener stopped accepting connections")),
        },
        () = shutdown_signal() => Ok(()),
    };

    providers.shutdown();
    result
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting sequence service with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting sequence service on {} (watermark {}, tick {:?}, idle threshold {:?})",
            config.listen_addr,
            config.engine.low_watermark,
            config.engine.tick_interval,
            config.engine.idle_threshold,
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM. Sessions and monitors are not drained;
/// they end with the process.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutting down");
}
