//! hubdav -- WebDAV gateway for hierarchical dataset blob stores.
//!
//! Crash-only design: the gateway keeps no state of its own beyond an
//! optional listing cache, so SIGTERM/SIGINT handlers only stop accepting
//! connections and wait for in-flight requests with a timeout.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hubdav::config::{Config, LoggingConfig};
use hubdav::storage::adapter::WorkerPool;
use hubdav::storage::backend::StoreConnector;

/// Command-line arguments for the hubdav server.
#[derive(Parser, Debug)]
#[command(
    name = "hubdav",
    version,
    about = "WebDAV gateway for hierarchical dataset blob stores"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "hubdav.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing file means "all defaults"; a broken one is fatal.
    let (config, loaded) = if std::path::Path::new(&cli.config).exists() {
        (hubdav::config::load_config(&cli.config)?, true)
    } else {
        (Config::default(), false)
    };

    init_tracing(&config.logging)?;
    if loaded {
        info!("Loaded configuration from {}", cli.config);
    } else {
        warn!("Config file {} not found, using defaults", cli.config);
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        hubdav::metrics::init_metrics()?;
        hubdav::metrics::describe_metrics();
        info!("Prometheus metrics initialized");

        if let Some(metrics_bind) = config.observability.metrics_bind.clone() {
            let listener = tokio::net::TcpListener::bind(&metrics_bind).await?;
            info!("Metrics listening on {}", metrics_bind);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, hubdav::metrics::metrics_router()).await {
                    warn!("Metrics listener stopped: {}", e);
                }
            });
        }
    }

    let connector = build_connector(&config)?;
    let pool = WorkerPool::new(config.storage.max_workers);
    info!(
        "Store worker pool sized at {} workers",
        config.storage.max_workers
    );

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(hubdav::AppState {
        config,
        connector,
        pool,
    });

    let app = hubdav::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("hubdav listening on {}", bind_addr);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections
    // and give in-flight requests `shutdown_timeout` to finish.
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let mut server = std::pin::pin!(server.into_future());
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Shutdown timeout of {:?} elapsed, exiting", shutdown_timeout);
        }
    }

    info!("hubdav shut down");

    Ok(())
}

/// Initialize tracing from the logging section; `RUST_LOG` wins when set.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

/// Pick the remote store implementation named by `storage.backend`.
fn build_connector(config: &Config) -> anyhow::Result<Arc<dyn StoreConnector>> {
    let connector: Arc<dyn StoreConnector> = match config.storage.backend.as_str() {
        "memory" => {
            info!("In-memory store initialized (contents are lost on exit)");
            Arc::new(hubdav::storage::memory::MemoryConnector::default())
        }
        "local" => {
            let root_dir = &config.storage.local.root_dir;
            let store = hubdav::storage::local::LocalStore::new(root_dir)?;
            info!("Local store initialized at {}", root_dir);
            Arc::new(hubdav::storage::local::LocalConnector::new(store))
        }
        "hub" => {
            let hub = &config.storage.hub;
            let connector = hubdav::storage::hub::HubConnector::new(hub)?;
            info!(
                "Hub store initialized: endpoint={} repo_type={} revision={}",
                hub.endpoint, hub.repo_type, hub.revision
            );
            Arc::new(connector)
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected memory, local or hub)"),
    };
    Ok(connector)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
