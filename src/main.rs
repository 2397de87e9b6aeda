use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use outbreak::{RunRequest, manager::Manager};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct RunLength {
    /// Number of time steps to run.
    #[arg(long, conflicts_with = "days")]
    steps: Option<usize>,

    /// Number of simulated days to run.
    #[arg(long)]
    days: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run {
        #[command(flatten)]
        length: RunLength,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        stop_when_no_infected: bool,
    },

    Ensemble {
        #[arg(long)]
        runs: usize,

        #[command(flatten)]
        length: RunLength,
    },

    Clean,
}

impl RunLength {
    fn request(&self, stop_when_no_infected: bool) -> RunRequest {
        RunRequest {
            steps: self.steps,
            days: self.days,
            stop_when_no_infected,
        }
    }
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Run {
            length,
            seed,
            stop_when_no_infected,
        } => mgr.run_simulation(&length.request(stop_when_no_infected), seed)?,
        Command::Ensemble { runs, length } => {
            mgr.run_ensemble(runs, &length.request(false))?
        }
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
