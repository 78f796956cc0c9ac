use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{HerdError, Result};

/// Append-only record of the job files submitted successfully in this run.
///
/// One path per line. The file is removed at the start of every run and is
/// never read back, so after a run it lists exactly that run's successes.
#[derive(Debug, Clone)]
pub struct SuccessLedger {
    path: PathBuf,
}

impl SuccessLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the ledger left over by a previous run.
    ///
    /// A missing ledger is fine; any other removal error is fatal.
    pub async fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Removed ledger from previous run");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HerdError::LedgerReset {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Append one successfully submitted path.
    pub async fn record(&self, job: &Path) -> Result<()> {
        let write_err = |source: std::io::Error| HerdError::LedgerWrite {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;

        let mut line = job.as_os_str().as_encoded_bytes().to_vec();
        line.push(b'\n');
        file.write_all(&line).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        tracing::debug!(ledger = %self.path.display(), job = %job.display(), "Recorded submission");
        Ok(())
    }
}
