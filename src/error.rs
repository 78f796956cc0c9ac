use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Any of these ends the run with a non-zero exit code.
///
/// Scheduler rejections are not represented here: they are retried
/// indefinitely by the submitter and never surface as errors.
#[derive(Error, Debug)]
pub enum HerdError {
    #[error("Failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to resolve absolute path for {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Carries the scanned roots, space separated.
    #[error("No job files found in {0}")]
    NoJobFiles(String),

    #[error("No job files to aggregate")]
    EmptyJobSet,

    #[error("Job file path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("Failed to remove previous ledger {path}: {source}")]
    LedgerReset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to record submission in ledger {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read template job file {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create aggregate script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free script name left for prefix {0}")]
    NamesExhausted(String),
}

pub type Result<T> = std::result::Result<T, HerdError>;
