//! genreml-br - work broker for GenreML audio workers
//!
//! Hands split audio clips to long-polling prediction and spectrogram
//! workers, collects their sealed results and serves them back to the
//! client session that submitted the clips.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use genreml_br::config::{BrokerConfig, ConfigOverrides};
use genreml_br::{build_router, AppState, Broker};
use genreml_common::Signer;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for genreml-br
#[derive(Parser, Debug)]
#[command(name = "genreml-br")]
#[command(about = "Work broker for GenreML prediction and spectrogram workers")]
#[command(version)]
struct Args {
    /// Optional TOML bootstrap file
    #[arg(short, long, env = "GENREML_BR_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "GENREML_BR_BIND")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "GENREML_BR_PORT")]
    port: Option<u16>,

    /// Artifact store root
    #[arg(short, long)]
    store_root: Option<PathBuf>,

    /// Model identifier stamped on work items
    #[arg(long, env = "GENREML_MODEL_HASH")]
    model_hash: Option<String>,

    /// Worker long-poll window in seconds
    #[arg(long, env = "GENREML_POLL_WINDOW_SECS")]
    poll_window_secs: Option<u64>,

    /// Client result wait in seconds
    #[arg(long, env = "GENREML_RESULT_WAIT_SECS")]
    result_wait_secs: Option<u64>,

    /// Batch lifetime in seconds
    #[arg(long, env = "GENREML_BATCH_TTL_SECS")]
    batch_ttl_secs: Option<u64>,

    /// Capacity of each tier queue
    #[arg(long, env = "GENREML_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_address: self.bind.clone(),
            port: self.port,
            store_root: self.store_root.clone(),
            model_hash: self.model_hash.clone(),
            poll_window_secs: self.poll_window_secs,
            result_wait_secs: self.result_wait_secs,
            batch_ttl_secs: self.batch_ttl_secs,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // TOML is read before tracing starts so its log level can apply
    let config = BrokerConfig::load(args.config.as_deref(), args.overrides());

    let default_level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting GenreML broker (genreml-br) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e).context("Failed to load configuration");
        }
    };
    info!(?config, "Configuration resolved");

    let session = match &config.session_secret {
        Some(secret) => Signer::new(secret.clone()),
        None => {
            warn!("SESSION_SIGNING_TOKEN not set, sessions will not survive a restart");
            Signer::generate()
        }
    };
    let workers = Signer::new(config.worker_secret.clone());

    let broker = Broker::new(config.settings.clone(), workers, session);
    broker
        .init()
        .await
        .context("Failed to prepare artifact store")?;

    let app = build_router(AppState::new(broker));

    let ip = config
        .bind_address
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let addr = SocketAddr::new(ip, config.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("genreml-br listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
