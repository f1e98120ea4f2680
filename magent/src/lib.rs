use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use csvfetcher::CsvEndpoint;
use fmigrate::config::JobFile;
use fmigrate::models::Endpoint;
use fmigrate::prompt::AlwaysContinue;
use fmigrate::retrieval::{RetrievalMode, DEFAULT_ITERATIVE_ROUNDS};
use fmigrate::{
    CsvRecordCache, JobConfig, JobOutcome, MigrationJob, PromptAnswer, PromptReason, Prompter,
    RecordExecutor, Schedule, SharedCsvCache,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the command line interface for the migration agent.
pub async fn run_cli() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => {
            let outcome = run_job(&args).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Some(Command::Plan(args)) => {
            let file = load_job_file(&args.base_path).await?;
            let schedule = Schedule::build(&file.descriptors()?);
            print!("{}", schedule.render_table());
        }
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the migration job described by <base_path>/migration.json
    Run(RunArgs),
    /// Prints the execution and query order without touching any data
    Plan(PlanArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory holding migration.json, entity files and reports
    #[arg(long, env = "MAGENT_BASE_PATH")]
    pub base_path: PathBuf,
    /// Stop after validating the source files
    #[arg(long, default_value_t = false)]
    pub validate_only: bool,
    /// Skip structural validation of the source files
    #[arg(long, default_value_t = false)]
    pub skip_validation: bool,
    /// Retrieve in rounds until nothing new is found, at most ROUNDS times
    #[arg(long, value_name = "ROUNDS")]
    pub iterative: Option<Option<usize>>,
    /// Answer every prompt with yes
    #[arg(long, short = 'y', env = "MAGENT_ASSUME_YES", default_value_t = false)]
    pub yes: bool,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long, env = "MAGENT_BASE_PATH")]
    base_path: PathBuf,
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Failed to read .env: {err}");
        }
    }
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn load_job_file(base_path: &Path) -> anyhow::Result<JobFile> {
    JobFile::load(base_path)
        .await
        .with_context(|| format!("failed to load job file from {}", base_path.display()))
}

/// Applies command line overrides on top of the job file's settings.
pub fn apply_overrides(config: &mut JobConfig, args: &RunArgs) {
    config.validate_only |= args.validate_only;
    config.skip_validation |= args.skip_validation;
    if let Some(rounds) = args.iterative {
        config.retrieval_mode = RetrievalMode::Iterative {
            max_rounds: rounds.unwrap_or(DEFAULT_ITERATIVE_ROUNDS).max(1),
        };
    }
}

/// Only file endpoints ship with this agent; live services need their own executor.
fn executor_for(
    config: &JobConfig,
    cache: SharedCsvCache,
) -> anyhow::Result<Arc<dyn RecordExecutor>> {
    for (side, endpoint) in [("source", &config.source), ("target", &config.target)] {
        if let Endpoint::Org { alias } = endpoint {
            bail!(
                "no executor available for the {side} org '{alias}'; only file endpoints are supported"
            );
        }
    }
    Ok(Arc::new(CsvEndpoint::new(config.clone(), cache)))
}

/// Loads the job file, wires the collaborators and runs the job once.
pub async fn run_job(args: &RunArgs) -> anyhow::Result<JobOutcome> {
    let file = load_job_file(&args.base_path).await?;
    let descriptors = file.descriptors().context("invalid entity descriptors")?;
    let mut config = file.config;
    apply_overrides(&mut config, args);

    let cache = CsvRecordCache::shared();
    let executor = executor_for(&config, cache.clone())?;
    let prompter: Arc<dyn Prompter> = if args.yes {
        Arc::new(AlwaysContinue)
    } else {
        Arc::new(StdinPrompter::stdin())
    };

    let job = MigrationJob::new(config, descriptors, executor, prompter, cache);
    let run_id = job.run_id();
    match job.run().await {
        Ok(outcome) => {
            info!(%run_id, "Job finished");
            Ok(outcome)
        }
        Err(err) => {
            error!(%run_id, "Job failed: {err}");
            Err(err).context("migration job failed")
        }
    }
}

/// Asks on stderr and reads a yes/no answer line by line.
pub struct StdinPrompter<R> {
    reader: Mutex<R>,
}

impl StdinPrompter<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> StdinPrompter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl<R> Prompter for StdinPrompter<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn ask_continue(
        &self,
        reason: PromptReason,
        context: &str,
    ) -> fmigrate::Result<PromptAnswer> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("{reason}: {context}\nContinue? [y/N] ").as_bytes())
            .await?;
        stderr.flush().await?;

        let mut line = String::new();
        self.reader.lock().await.read_line(&mut line).await?;
        Ok(parse_answer(&line))
    }
}

fn parse_answer(line: &str) -> PromptAnswer {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PromptAnswer::Proceed,
        _ => PromptAnswer::Abort,
    }
}
