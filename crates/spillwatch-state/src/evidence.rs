use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use spillwatch_types::{Result, SpillwatchError};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

const EVIDENCE_EXTENSION: &str = "jpg";

/// Durable sink for detection evidence frames.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Writes `data` under `stem`. Must never replace an existing entry:
    /// a taken stem yields `DuplicateTimestamp`. On any other failure nothing
    /// may remain under `stem`.
    async fn persist(&self, stem: &str, data: &[u8]) -> Result<PathBuf>;

    /// Stems of every evidence entry already present.
    async fn list(&self) -> Result<Vec<String>>;

    /// Location an entry with this stem lives at.
    fn path_for(&self, stem: &str) -> PathBuf;
}

/// Evidence kept as `<dir>/<stem>.jpg` files.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    dir: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        if let Err(err) = write_all_synced(&mut file, data).await {
            drop(file);
            if let Err(cleanup) = fs::remove_file(path).await {
                warn!(path = %path.display(), error = %cleanup, "failed to remove partial evidence file");
            }
            return Err(err);
        }
        Ok(())
    }
}

async fn write_all_synced(file: &mut fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn persist(&self, stem: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(stem);
        match self.write_new(&path, data).await {
            Ok(()) => {
                debug!(path = %path.display(), bytes = data.len(), "evidence written");
                Ok(path)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(SpillwatchError::DuplicateTimestamp(stem.to_string()))
            }
            Err(err) => Err(persistence_error(format!(
                "failed to write evidence {}: {err}",
                path.display()
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(persistence_error(format!(
                    "failed to read evidence dir {}: {err}",
                    self.dir.display()
                )))
            }
        };
        let mut stems = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| persistence_error(format!("failed to scan evidence dir: {err}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EVIDENCE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{EVIDENCE_EXTENSION}"))
    }
}

pub fn persistence_error(message: impl Into<String>) -> SpillwatchError {
    SpillwatchError::Persistence(message.into())
}
