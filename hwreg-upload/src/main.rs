//! hwreg-upload - device identity upload service
//!
//! Serves the upload control API (HTTP + SSE) by default. With `--once` it
//! performs a single upload run, prints the outcome as JSON and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hwreg_common::config::{self as common_config, TomlConfig};
use hwreg_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hwreg_upload::config::resolve_access_token;
use hwreg_upload::models::{EngineSettings, RunDefaults};
use hwreg_upload::services::{
    CommandIdentitySource, GraphRegistryClient, LocalIdentitySource, Pipeline, RecordSource,
    StaticCredentialProvider, TokioSleeper, UnavailableIdentitySource, UploadEngine,
    UploadRequest, UploadSupervisor,
};
use hwreg_upload::AppState;

/// How long a running upload gets to stop after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Command-line arguments for hwreg-upload
#[derive(Parser, Debug)]
#[command(name = "hwreg-upload")]
#[command(about = "Device identity upload and reconciliation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the TOML setting)
    #[arg(short, long, env = "HWREG_PORT")]
    port: Option<u16>,

    /// Folder for generated identity files
    #[arg(short, long)]
    work_folder: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Run one upload, print the outcome as JSON and exit
    #[arg(long)]
    once: bool,

    /// Input file for --once; omit to collect the local machine identity
    #[arg(long, requires = "once")]
    file: Option<PathBuf>,

    /// Serial number used when the local machine reports none
    #[arg(long)]
    fallback_serial: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = common_config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    if args.init_config {
        let path = args
            .config
            .clone()
            .or_else(common_config::default_config_path)
            .context("No configuration path available")?;
        common_config::write_toml_config(&config, &path)?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    info!("Starting hwreg-upload {}", env!("CARGO_PKG_VERSION"));

    let work_folder = common_config::resolve_work_folder(args.work_folder.as_deref(), &config);
    info!("Work folder: {}", work_folder.display());

    let event_bus = EventBus::new(256);
    let supervisor = Arc::new(build_supervisor(&config, work_folder, event_bus.clone())?);

    if args.once {
        let request = UploadRequest {
            fallback_serial: args.fallback_serial,
            ..UploadRequest::from_file(args.file)
        };
        let outcome = supervisor.start(request)?.wait().await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if !outcome.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let port = args.port.unwrap_or(config.port);
    let app = hwreg_upload::build_router(AppState::new(Arc::clone(&supervisor), event_bus));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Install the subscriber: RUST_LOG wins over the TOML level
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn build_supervisor(
    config: &TomlConfig,
    work_folder: PathBuf,
    event_bus: EventBus,
) -> Result<UploadSupervisor> {
    let credentials = Arc::new(StaticCredentialProvider::new(resolve_access_token(config)));

    let registry = Arc::new(
        GraphRegistryClient::new(
            &config.registry.base_url,
            credentials.clone(),
            config.registry.requests_per_second,
            Duration::from_secs(config.registry.request_timeout_secs),
        )
        .context("Failed to build registry client")?,
    );

    let identity: Arc<dyn LocalIdentitySource> = match &config.identity.command {
        Some(command) => Arc::new(CommandIdentitySource::new(
            command.clone(),
            config.identity.args.clone(),
        )),
        None => {
            warn!("No identity collector configured; uploads need an input file");
            Arc::new(UnavailableIdentitySource)
        }
    };

    let settings = EngineSettings::from(&config.upload);
    let engine = UploadEngine::new(
        registry,
        Arc::new(TokioSleeper),
        settings.poll,
        settings.scan,
        event_bus.clone(),
    );

    let pipeline = Pipeline::new(
        credentials,
        RecordSource::new(identity, work_folder),
        engine,
        event_bus.clone(),
    );

    Ok(UploadSupervisor::new(
        pipeline,
        event_bus,
        RunDefaults::from_config(&config.upload),
        SHUTDOWN_GRACE,
    ))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
