use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pbs_herd::config::{MemorySize, ParallelConfig, RunConfig, DEFAULT_RETRY_BACKOFF};
use pbs_herd::run::{run, RunSummary};
use pbs_herd::submit::CommandScheduler;

#[derive(Parser, Debug)]
#[command(name = "pbs-herd")]
#[command(version)]
#[command(about = "Submit every PBS job file under the given directories")]
struct Args {
    /// Directories to scan for job files (subdirectories are visited too)
    #[arg(required = true, value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Enable parallel processing: fold all job files into one aggregate job
    #[arg(short = 'p', long)]
    parallel: bool,

    /// Number of nodes to request. Only used with -p.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    nodes: u32,

    /// CPUs per node. Only used with -p.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    ppn: u32,

    /// Run n jobs in parallel, defaults to nodes*ppn. Only used with -p.
    #[arg(long)]
    jobs: Option<u32>,

    /// Memory size, e.g. 5gb. "auto" omits the directive. Only used with -p.
    #[arg(long, default_value = "auto")]
    mem: MemorySize,

    /// Walltime of the aggregate job. Only used with -p.
    #[arg(long, default_value = "24:00:00")]
    walltime: String,

    /// File prefix of the generated PBS script. Only used with -p.
    #[arg(long, default_value = "pwork")]
    name: String,

    /// Generate the aggregate script but do not submit it. Only used with -p.
    #[arg(long)]
    hold: bool,

    /// Render and use absolute job file paths
    #[arg(long)]
    abs: bool,

    /// Job file extension
    #[arg(long, default_value = "pbs")]
    ext: String,

    /// Where successfully submitted files are recorded
    #[arg(long, default_value = "./success_submitted_list.txt")]
    ledger: PathBuf,

    /// Scheduler submission command
    #[arg(long, default_value = "qsub")]
    submit_cmd: String,

    /// Task runner used inside the aggregate job. Only used with -p.
    #[arg(long, default_value = "rush")]
    runner: String,

    /// Summary format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let parallel = self.parallel.then(|| ParallelConfig {
            nodes: self.nodes,
            ppn: self.ppn,
            jobs: self.jobs,
            mem: self.mem,
            walltime: self.walltime,
            name_prefix: self.name,
            runner: self.runner,
            hold: self.hold,
            ..ParallelConfig::default()
        });

        RunConfig {
            roots: self.dirs,
            extension: self.ext,
            absolute: self.abs,
            ledger_path: self.ledger,
            submit_program: self.submit_cmd,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            parallel,
        }
    }
}

fn print_summary(summary: &RunSummary, format: &OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Table => {
            println!("Run Summary");
            println!("{}", "=".repeat(40));
            println!("Mode:        {}", summary.mode);
            println!("Discovered:  {}", summary.discovered.len());
            println!("Submitted:   {}", summary.submitted.len());
            println!("Attempts:    {}", summary.attempts);
            if let Some(script) = &summary.aggregate_script {
                let state = if summary.held { " (held)" } else { "" };
                println!("Script:      {}{}", script.display(), state);
            }
            println!("Ledger:      {}", summary.ledger.display());
            println!(
                "Elapsed:     {}s",
                (summary.finished_at - summary.started_at).num_seconds()
            );
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let output = args.output.clone();
    let config = args.into_config();

    let scheduler = CommandScheduler::from_command_line(&config.submit_program)
        .ok_or("--submit-cmd must not be empty")?;

    tracing::info!(version = pbs_herd::VERSION, "pbs-herd starting");

    let summary = match run(&config, scheduler).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            return Err(e.into());
        }
    };

    print_summary(&summary, &output)?;
    Ok(())
}
