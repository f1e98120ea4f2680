use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fmigrate::config::JobFile;
use fmigrate::Schedule;
use log::LevelFilter;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(
    name = "fmigrate-plan",
    about = "Print the execution and query order computed for a migration job file."
)]
struct Cli {
    /// Directory containing migration.json and the entity files.
    #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    base_path: PathBuf,

    /// Minimum log level to display.
    #[arg(long, default_value_t = LogLevelArg::Warn, value_enum)]
    log_level: LogLevelArg,

    /// Emit JSON instead of a textual table.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default());
    logger.filter_level(LevelFilter::from(cli.log_level));
    let _ = logger.try_init();

    let file = JobFile::load(&cli.base_path)
        .await
        .with_context(|| format!("failed to load job file from {}", cli.base_path.display()))?;
    let descriptors = file.descriptors().context("invalid entity descriptors")?;
    let schedule = Schedule::build(&descriptors);

    if cli.json {
        let value = json!({
            "execution": schedule.execution_names(),
            "query": schedule.query_names(),
            "master_detail_converged": schedule.master_detail_converged,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", schedule.render_table());
        if !schedule.master_detail_converged {
            println!("warning: master-detail order did not settle; some children may precede parents");
        }
    }
    Ok(())
}
