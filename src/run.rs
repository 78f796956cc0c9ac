use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collector::{collect_job_files, dedup_paths};
use crate::config::RunConfig;
use crate::error::{HerdError, Result};
use crate::ledger::SuccessLedger;
use crate::script::ScriptBuilder;
use crate::submit::{JobScheduler, Submitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Single,
    Parallel,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Single => write!(f, "single"),
            RunMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub discovered: Vec<PathBuf>,
    /// Files (or the aggregate script) accepted by the scheduler, in order
    pub submitted: Vec<PathBuf>,
    /// Submission attempts across the run, retries included
    pub attempts: u64,
    pub aggregate_script: Option<PathBuf>,
    pub held: bool,
    pub ledger: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Discover, deduplicate and submit.
///
/// The ledger is reset before discovery so a failed run never leaves a
/// previous run's record behind.
pub async fn run<S: JobScheduler>(config: &RunConfig, scheduler: S) -> Result<RunSummary> {
    let started_at = Utc::now();
    let ledger = SuccessLedger::new(config.ledger_path.clone());
    tracing::info!(
        ledger = %ledger.path().display(),
        "Submitted file list will be saved to the ledger"
    );
    ledger.reset().await?;

    let files = collect_job_files(
        config.roots.as_slice(),
        config.normalized_extension(),
        config.absolute,
    )?;
    let files = dedup_paths(files);
    tracing::info!(
        count = files.len(),
        files = ?files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        "Detected files"
    );

    if files.is_empty() {
        let roots = config
            .roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        return Err(HerdError::NoJobFiles(roots));
    }

    let submitter = Submitter::new(scheduler, ledger, config.retry_backoff);
    let mut submitted = Vec::new();
    let mut attempts = 0;

    let (mode, aggregate_script, held) = match &config.parallel {
        Some(parallel) => {
            tracing::info!("Parallel mode is enabled");
            let aggregate = ScriptBuilder::new(parallel.clone()).build(&files).await?;

            if parallel.hold {
                tracing::info!(
                    path = %aggregate.path.display(),
                    "Hold requested, check the generated script and submit it yourself"
                );
            } else {
                let report = submitter.submit(&aggregate.path).await?;
                attempts += report.attempts;
                submitted.push(report.job);
            }
            (RunMode::Parallel, Some(aggregate.path), parallel.hold)
        }
        None => {
            for file in &files {
                let report = submitter.submit(file).await?;
                attempts += report.attempts;
                submitted.push(report.job);
            }
            (RunMode::Single, None, false)
        }
    };

    tracing::info!(submitted = submitted.len(), attempts, "End");

    Ok(RunSummary {
        mode,
        discovered: files,
        submitted,
        attempts,
        aggregate_script,
        held,
        ledger: config.ledger_path.clone(),
        started_at,
        finished_at: Utc::now(),
    })
}
