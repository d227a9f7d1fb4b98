//! Conduit - CLI
//!
//! Runs the classic channel programs on a configurable scheduler.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit::demo::{self, TickerEvent};
use conduit::util::logger::{self, LogLevel};
use conduit::{RuntimeConfig, Scheduler, NAME, VERSION};
use tracing::info;

/// Lightweight tasks and typed channels
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(author = "YaoXiang Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Number of worker threads (overrides config and environment)
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sum two halves of a slice in parallel tasks
    Sum,

    /// Produce Fibonacci numbers into a buffered channel and range over it
    Fib {
        /// How many numbers to produce
        #[arg(default_value_t = 10, value_parser = clap::value_parser!(u16).range(0..=93))]
        n: u16,
    },

    /// Fibonacci driven by select with a quit channel
    SelectFib {
        /// How many numbers to consume
        #[arg(default_value_t = 10, value_parser = clap::value_parser!(u16).range(0..=93))]
        n: u16,
    },

    /// Ticker, timer and default case in one select loop
    Ticker {
        /// Tick period in milliseconds
        #[arg(long, default_value_t = 100)]
        tick_ms: u64,

        /// Timer delay in milliseconds
        #[arg(long, default_value_t = 500)]
        boom_ms: u64,
    },

    /// Overfill a buffered channel
    Buffered,

    /// Running totals from an accumulator owned by one task
    Adder {
        /// Values to add
        #[arg(
            value_name = "VALUE",
            default_values_t = [1i64, 2, 3, 4, 5],
            allow_negative_numbers = true
        )]
        values: Vec<i64>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        RuntimeConfig::load(args.config.as_deref()).with_context(|| match &args.config {
            Some(path) => format!("Failed to load config: {}", path.display()),
            None => "Failed to read CONDUIT_* environment".to_string(),
        })?;
    if let Some(workers) = args.workers {
        config.scheduler.num_workers = workers;
        config.scheduler.max_threads = config.scheduler.max_threads.max(workers);
    }
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level
    };
    logger::init_with_level(level);

    if args.verbose {
        eprintln!("{} version: {}", NAME, VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    if let Commands::Version = args.command {
        println!("{} {}", NAME, VERSION);
        return Ok(());
    }

    let scheduler =
        Scheduler::with_config(config.scheduler).context("Failed to start scheduler")?;

    match args.command {
        Commands::Sum => {
            let (x, y) = demo::sum(&scheduler, &[7, 2, 8, -9, 4, 0])?;
            println!("{} {} {}", x, y, x + y);
        }
        Commands::Fib { n } => {
            for value in demo::fibonacci(&scheduler, usize::from(n))? {
                println!("{}", value);
            }
        }
        Commands::SelectFib { n } => {
            for value in demo::select_fibonacci(&scheduler, usize::from(n))? {
                println!("{}", value);
            }
            println!("quit");
        }
        Commands::Ticker { tick_ms, boom_ms } => {
            let events = demo::ticker(
                &scheduler,
                Duration::from_millis(tick_ms),
                Duration::from_millis(boom_ms),
            )?;
            for event in events {
                match event {
                    TickerEvent::Tick => println!("tick."),
                    TickerEvent::Boom => println!("BOOM!"),
                    TickerEvent::Idle => println!("    ."),
                }
            }
        }
        Commands::Buffered => {
            for value in demo::buffered(&scheduler)? {
                println!("{}", value);
            }
        }
        Commands::Adder { values } => {
            let (sums, total) = demo::running_sums(&scheduler, &values)?;
            for sum in sums {
                println!("{}", sum);
            }
            println!("total {}", total);
        }
        Commands::Version => {}
    }

    let stats = scheduler.stats();
    info!(
        scheduled = stats.tasks_scheduled.load(Ordering::Relaxed),
        helpers = stats.helpers_started.load(Ordering::Relaxed),
        "done"
    );
    scheduler.shutdown();
    Ok(())
}
