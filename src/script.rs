//! Aggregate job generation.
//!
//! Folds a set of job files into a single PBS script. The script requests
//! the configured allocation, copies the remaining directives of a template
//! job (the first file in the set), and runs every file through the task
//! runner with a fixed concurrency:
//!
//! ```text
//! #PBS -N gosub_parallel_work
//! #PBS -l nodes=2:ppn=4
//! #PBS -l walltime=24:00:00
//! #PBS -q batch
//! echo a.pbs b.pbs | rush -D ' ' 'bash {}' -j 8
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::config::ParallelConfig;
use crate::error::{HerdError, Result};

/// Extension of generated scripts.
pub const SCRIPT_EXTENSION: &str = "pbs";

const DIRECTIVE_PREFIX: &str = "#PBS";

/// Resource keys whose values the generated header owns. `select` and
/// `ncpus` describe node and processor counts in PBS Pro chunk syntax.
const OVERRIDDEN_RESOURCES: &[&str] = &[
    "nodes", "ppn", "select", "ncpus", "walltime", "mem", "pmem", "vmem", "pvmem",
];

/// A generated aggregate job on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateJob {
    pub path: PathBuf,
    pub concurrency: u64,
    pub job_count: usize,
}

/// Reserve a fresh `<prefix><n>.pbs` in `dir`, starting at n = 1.
///
/// The file is created empty with create-new semantics, so a name is only
/// returned once the file exists and no concurrent run can be handed the
/// same one.
pub async fn reserve_script_path(dir: &Path, prefix: &str) -> Result<PathBuf> {
    for number in 1..=u32::MAX {
        let candidate = dir.join(format!("{}{}.{}", prefix, number, SCRIPT_EXTENSION));

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => {
                tracing::info!(path = %candidate.display(), "Created aggregate script file");
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::info!(
                    path = %candidate.display(),
                    "File exists, trying another name"
                );
            }
            Err(source) => {
                return Err(HerdError::Script {
                    path: candidate,
                    source,
                })
            }
        }
    }

    Err(HerdError::NamesExhausted(prefix.to_string()))
}

/// Directive lines of `template` that do not clash with the generated header.
///
/// Every option on a directive line is parsed, with `-l` either attached
/// (`-lwalltime=1:00:00`) or separate, and repeated `-l` groups handled on
/// their own. Parsing stops at a `#` comment. `-N` and its argument are
/// dropped, and so is any resource that sets a key the header owns, even
/// inside a `:` separated chunk. A line with nothing left, or with a
/// dangling `-l`, is dropped entirely.
pub fn template_directives(template: &str) -> Vec<String> {
    template
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(DIRECTIVE_PREFIX))
        .filter_map(filter_directive)
        .collect()
}

fn filter_directive(line: &str) -> Option<String> {
    let body = &line[DIRECTIVE_PREFIX.len()..];
    // `#PBSfoo` is not a directive.
    if !body.is_empty() && !body.starts_with(char::is_whitespace) {
        return None;
    }

    let mut tokens = body
        .split_whitespace()
        .take_while(|token| !token.starts_with('#'));
    let mut kept: Vec<String> = Vec::new();

    while let Some(token) = tokens.next() {
        if token == "-N" {
            tokens.next();
        } else if let Some(attached) = token.strip_prefix("-l") {
            let list = if attached.is_empty() {
                tokens.next()?
            } else {
                attached
            };
            let resources: Vec<&str> = list
                .split(',')
                .filter(|r| !r.is_empty() && !is_overridden(r))
                .collect();
            if !resources.is_empty() {
                kept.push(format!("-l {}", resources.join(",")));
            }
        } else {
            kept.push(token.to_string());
        }
    }

    if kept.is_empty() {
        None
    } else {
        Some(format!("{} {}", DIRECTIVE_PREFIX, kept.join(" ")))
    }
}

/// True when any `key=value` part of a resource, chunk parts included, sets
/// a key the header owns.
fn is_overridden(resource: &str) -> bool {
    resource.split(':').any(|part| {
        let key = part.split('=').next().unwrap_or(part).trim();
        OVERRIDDEN_RESOURCES.contains(&key)
    })
}

/// Job paths joined with single spaces, as handed to the task runner.
pub fn join_paths(jobs: &[PathBuf]) -> String {
    jobs.iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The command line that fans `jobs` out over the task runner.
pub fn fan_out_command(jobs: &[PathBuf], runner: &str, concurrency: u64) -> String {
    format!(
        "echo {} | {} -D ' ' 'bash {{}}' -j {}",
        join_paths(jobs),
        runner,
        concurrency
    )
}

/// Full text of the aggregate script.
pub fn render_script(jobs: &[PathBuf], template: &str, config: &ParallelConfig) -> String {
    let mut lines = vec![
        format!("{} -N {}", DIRECTIVE_PREFIX, config.job_name),
        format!("{} -l nodes={}:ppn={}", DIRECTIVE_PREFIX, config.nodes, config.ppn),
        format!("{} -l walltime={}", DIRECTIVE_PREFIX, config.walltime),
    ];
    if let Some(mem) = config.mem.as_directive_value() {
        lines.push(format!("{} -l mem={}", DIRECTIVE_PREFIX, mem));
    }
    lines.extend(template_directives(template));
    lines.push(fan_out_command(jobs, &config.runner, config.concurrency()));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Builds aggregate scripts from a [`ParallelConfig`].
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    config: ParallelConfig,
}

impl ScriptBuilder {
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Generate the aggregate script for `jobs`, using the first one as template.
    ///
    /// An empty `jobs` is `EmptyJobSet`; every path must be valid UTF-8 since
    /// the script names them as text.
    pub async fn build(&self, jobs: &[PathBuf]) -> Result<AggregateJob> {
        let template_path = jobs.first().ok_or(HerdError::EmptyJobSet)?;
        if let Some(bad) = jobs.iter().find(|p| p.to_str().is_none()) {
            return Err(HerdError::NonUtf8Path(bad.clone()));
        }
        let template = fs::read_to_string(template_path)
            .await
            .map_err(|source| HerdError::Template {
                path: template_path.clone(),
                source,
            })?;

        tracing::info!(
            slots = self.config.slots(),
            ppn = self.config.ppn,
            "Use {} threads: {} CPUs per node",
            self.config.slots(),
            self.config.ppn
        );
        tracing::info!(files = %join_paths(jobs), "Joined file list with spaces");

        let path = reserve_script_path(&self.config.output_dir, &self.config.name_prefix).await?;
        let contents = render_script(jobs, &template, &self.config);

        let write_err = |source: std::io::Error| HerdError::Script {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        file.write_all(contents.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        let concurrency = self.config.concurrency();
        tracing::info!(
            path = %path.display(),
            template = %template_path.display(),
            jobs = jobs.len(),
            concurrency,
            "Generated aggregate script"
        );
        tracing::info!(
            runner = %self.config.runner,
            "NOTE the '{}' command should be available in PATH",
            self.config.runner
        );

        Ok(AggregateJob {
            path,
            concurrency,
            job_count: jobs.len(),
        })
    }
}
