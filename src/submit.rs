//! Job submission with unbounded retry.
//!
//! Every failure is treated as transient: the submitter logs it, sleeps for
//! the fixed backoff and tries the same file again, forever. There is no
//! retry limit, no jitter and no escalation. A file the scheduler will never
//! accept therefore blocks the run until it is killed externally.
//!
//! # Components
//!
//! - [`JobScheduler`]: the seam to the cluster scheduler
//! - [`CommandScheduler`]: spawns the submission program (`qsub` by default)
//! - [`Submitter`]: the retry loop, records each success in the ledger

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::Result;
use crate::ledger::SuccessLedger;

/// What the scheduler said when it accepted a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Trimmed stdout of the submission program, usually the job id
    pub output: Option<String>,
}

/// A rejected or failed submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitFailure {
    pub exit_code: Option<i32>,
    pub message: String,
}

impl fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Accepts or rejects a single job file.
pub trait JobScheduler {
    fn submit(
        &self,
        job: &Path,
    ) -> impl Future<Output = std::result::Result<SubmitReceipt, SubmitFailure>> + Send;
}

/// Submits by running an external program with the job file as last argument.
#[derive(Debug, Clone)]
pub struct CommandScheduler {
    program: String,
    args: Vec<String>,
}

impl CommandScheduler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a whitespace separated command line such as `qsub -q batch`.
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn process_output(
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> std::result::Result<SubmitReceipt, SubmitFailure> {
        match result {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(SubmitReceipt {
                    output: if stdout.is_empty() { None } else { Some(stdout) },
                })
            }
            Ok(output) => {
                let exit_code = output.status.code();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(SubmitFailure {
                    exit_code,
                    message: if stderr.is_empty() {
                        format!("Exit code: {:?}", exit_code)
                    } else {
                        stderr
                    },
                })
            }
            Err(e) => Err(SubmitFailure {
                exit_code: None,
                message: e.to_string(),
            }),
        }
    }
}

impl JobScheduler for CommandScheduler {
    async fn submit(&self, job: &Path) -> std::result::Result<SubmitReceipt, SubmitFailure> {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(job)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(result)
    }
}

/// Outcome of a submission that eventually went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub job: PathBuf,
    /// Attempts made, including the successful one
    pub attempts: u64,
    pub receipt: SubmitReceipt,
}

/// Submits job files one at a time, retrying each until it is accepted.
#[derive(Debug)]
pub struct Submitter<S> {
    scheduler: S,
    ledger: SuccessLedger,
    backoff: Duration,
}

impl<S: JobScheduler> Submitter<S> {
    pub fn new(scheduler: S, ledger: SuccessLedger, backoff: Duration) -> Self {
        Self {
            scheduler,
            ledger,
            backoff,
        }
    }

    pub fn ledger(&self) -> &SuccessLedger {
        &self.ledger
    }

    /// Submit `job`, retrying after every failure until the scheduler accepts it.
    ///
    /// # Errors
    ///
    /// Only a ledger write failure is returned. Scheduler failures never
    /// surface; they are retried.
    pub async fn submit(&self, job: &Path) -> Result<SubmissionReport> {
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            tracing::info!(job = %job.display(), attempt = attempts, "Submitting");

            match self.scheduler.submit(job).await {
                Ok(receipt) => {
                    self.ledger.record(job).await?;
                    tracing::info!(
                        job = %job.display(),
                        attempts,
                        scheduler_output = ?receipt.output,
                        "Submitted"
                    );
                    return Ok(SubmissionReport {
                        job: job.to_path_buf(),
                        attempts,
                        receipt,
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        job = %job.display(),
                        attempt = attempts,
                        exit_code = ?failure.exit_code,
                        error = %failure.message,
                        "Submission failed"
                    );
                    tracing::info!(
                        wait_secs = self.backoff.as_secs(),
                        "Waiting before resubmitting"
                    );
                    tokio::time::sleep(self.backoff).await;
                    tracing::info!(job = %job.display(), "Calling back to submit");
                }
            }
        }
    }
}
