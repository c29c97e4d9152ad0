//! Operational helpers: logging, evidence directory setup, shutdown signal.

use std::path::PathBuf;

use spillwatch_types::{config::OpsConfig, Result, SpillwatchError};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level; an unparsable filter falls back to `info`.
pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| SpillwatchError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| SpillwatchError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_evidence_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir)
        .map_err(|err| SpillwatchError::Ops(format!("failed to create evidence dir: {err}")))?;
    info!("Evidence directory ready at {:?}", dir);
    Ok(dir)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_dir_is_created_recursively() {
        let root = tempfile::tempdir().expect("tempdir");
        let nested = root.path().join("a/b/frames");
        let dir = ensure_evidence_dir(nested.to_str().expect("utf-8 path")).expect("create");
        assert!(dir.is_dir());
        // idempotent
        ensure_evidence_dir(nested.to_str().expect("utf-8 path")).expect("again");
    }

    #[test]
    fn evidence_dir_over_a_file_fails() {
        let root = tempfile::tempdir().expect("tempdir");
        let file = root.path().join("occupied");
        std::fs::write(&file, b"x").expect("write");
        let err = ensure_evidence_dir(file.to_str().expect("utf-8 path")).expect_err("file in the way");
        assert!(matches!(err, SpillwatchError::Ops(_)));
    }
}
