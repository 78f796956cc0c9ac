use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default wait between a failed submission and its retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Memory request for the aggregate job.
///
/// `Auto` leaves the memory directive out entirely so the scheduler (or a
/// queue default) decides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MemorySize {
    #[default]
    Auto,
    Explicit(String),
}

impl MemorySize {
    pub fn as_directive_value(&self) -> Option<&str> {
        match self {
            MemorySize::Auto => None,
            MemorySize::Explicit(size) => Some(size),
        }
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("memory size must not be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case("auto") {
            Ok(MemorySize::Auto)
        } else {
            Ok(MemorySize::Explicit(trimmed.to_string()))
        }
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySize::Auto => write!(f, "auto"),
            MemorySize::Explicit(size) => write!(f, "{}", size),
        }
    }
}

/// Configuration for the aggregated parallel job.
///
/// All discovered job files are folded into one generated script that
/// requests `nodes` x `ppn` slots and lets the task runner fan the files out
/// inside that allocation.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of nodes to request
    pub nodes: u32,
    /// Processors per node
    pub ppn: u32,
    /// Explicit number of concurrent tasks. `None` (or 0) means nodes * ppn.
    pub jobs: Option<u32>,
    /// Memory request, `auto` omits the directive
    pub mem: MemorySize,
    /// Wall-clock limit (e.g., "24:00:00")
    pub walltime: String,
    /// File name prefix for the generated script
    pub name_prefix: String,
    /// Value of the `#PBS -N` directive in the generated script
    pub job_name: String,
    /// Task runner invoked inside the aggregate job
    pub runner: String,
    /// Directory the generated script is written to
    pub output_dir: PathBuf,
    /// Leave the generated script on disk instead of submitting it
    pub hold: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            nodes: 1,
            ppn: 1,
            jobs: None,
            mem: MemorySize::Auto,
            walltime: "24:00:00".to_string(),
            name_prefix: "pwork".to_string(),
            job_name: "gosub_parallel_work".to_string(),
            runner: "rush".to_string(),
            output_dir: PathBuf::from("."),
            hold: false,
        }
    }
}

impl ParallelConfig {
    /// Total execution slots requested from the scheduler.
    pub fn slots(&self) -> u64 {
        u64::from(self.nodes) * u64::from(self.ppn)
    }

    /// Number of tasks the runner keeps in flight.
    pub fn concurrency(&self) -> u64 {
        match self.jobs {
            Some(jobs) if jobs > 0 => u64::from(jobs),
            _ => self.slots(),
        }
    }
}

/// Configuration for a whole run, built once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directories to scan (recursively)
    pub roots: Vec<PathBuf>,
    /// Job file extension, without the leading dot
    pub extension: String,
    /// Resolve discovered paths to absolute form
    pub absolute: bool,
    /// Where successful submissions are recorded
    pub ledger_path: PathBuf,
    /// Scheduler submission program (called as `<program> <job file>`)
    pub submit_program: String,
    /// Fixed wait between a failed submission and the next attempt
    pub retry_backoff: Duration,
    /// Aggregate mode, `None` submits every file on its own
    pub parallel: Option<ParallelConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extension: "pbs".to_string(),
            absolute: false,
            ledger_path: PathBuf::from("./success_submitted_list.txt"),
            submit_program: "qsub".to_string(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            parallel: None,
        }
    }
}

impl RunConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Extension as matched against `Path::extension`, tolerant of a leading dot.
    pub fn normalized_extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }
}
