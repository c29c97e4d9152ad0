use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use spillwatch_control::ControlSurface;
use spillwatch_http::{create_router, serve, AppState};
use spillwatch_ops::{ensure_evidence_dir, init_tracing, shutdown_signal};
use spillwatch_state::{DetectionLedger, FrameStore, FsEvidenceStore};
use spillwatch_stream::FrameBroadcaster;
use spillwatch_types::config::ServerConfig;
use tracing::info;

/// Live JPEG relay with an oil-spill detection evidence ledger.
#[derive(Debug, Parser)]
#[command(name = "spillwatch-server", version)]
struct Args {
    /// Optional TOML config file; environment variables override it.
    #[arg(long, env = "SPILLWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port, overrides PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Bind address, overrides BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.ops)?;
    let evidence_dir = ensure_evidence_dir(&config.storage.evidence_dir)?;

    let store = Arc::new(FrameStore::new());
    let ledger = Arc::new(
        DetectionLedger::restore(Arc::new(FsEvidenceStore::new(evidence_dir)))
            .await
            .context("failed to restore detection history")?,
    );
    let control = Arc::new(ControlSurface::new(
        Arc::clone(&store),
        ledger,
        config.auth.clone(),
    ));
    let broadcaster = FrameBroadcaster::new(store, config.stream.clone());

    let router = create_router(
        AppState {
            control,
            broadcaster: broadcaster.clone(),
        },
        config.network.max_upload_bytes,
    );

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, router, broadcaster, shutdown_signal())
        .await
        .context("HTTP server error")?;
    info!("server stopped");
    Ok(())
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(bind) = &args.bind {
        config.network.bind_addr = bind.clone();
    }
    config.validate()?;
    Ok(config)
}
