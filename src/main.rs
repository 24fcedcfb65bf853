//! Demo entry point for Foresight
//!
//! Wraps a configurable computation and prints the value returned by
//! `compute_result`.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

use foresight::{Executor, Foresight, ForesightConfig, Recovery};

#[derive(Parser, Debug)]
#[command(name = "foresight-demo", about = "Run a wrapped computation once")]
struct Args {
    /// Value the computation returns
    #[arg(long, default_value = "42")]
    value: String,

    /// How long the computation sleeps before returning
    #[arg(long, default_value_t = 0)]
    sleep_ms: u64,

    /// Make the computation fail
    #[arg(long)]
    fail: bool,

    /// Value returned when the computation fails
    #[arg(long)]
    fallback: Option<String>,

    /// Run on the calling thread
    #[arg(long)]
    blocking: bool,

    /// Print elapsed time
    #[arg(long)]
    timed: bool,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ForesightConfig::load(path)?,
        None => ForesightConfig::default(),
    };

    let value = args.value.clone();
    let sleep = Duration::from_millis(args.sleep_ms);
    let fail = args.fail;

    let mut task = Foresight::of(move || {
        std::thread::sleep(sleep);
        if fail {
            anyhow::bail!("computation asked to fail");
        }
        Ok(value.clone())
    })
    .with_options(config.task)
    .with_executor(Executor::from_config(&config.executor)?);

    if args.blocking {
        task = task.with_blocking();
    }
    if args.timed {
        task = task.with_timing();
    }

    let mut recovery = Recovery::none().on_failure(|failure| error!("{}", failure));
    if let Some(fallback) = args.fallback {
        recovery = recovery.fallback(fallback);
    }

    info!("Running Foresight {}", task.id());
    match task.compute_result_with(recovery)? {
        Some(result) => println!("{}", result),
        None => println!("<none>"),
    }
    Ok(())
}
