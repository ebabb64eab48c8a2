use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "sluice-cmd")]
#[command(about = "Command-line front end for the Sluice worker pipeline")]
#[command(version)]
struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count letter frequencies across files using a worker pool
    Letters {
        /// Files to read
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// JSON file with pipeline settings (workers, capacities, timeout)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of workers (overrides the config file)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Bound on the whole run in milliseconds (overrides the config file)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Exit with an error if any file could not be read
        #[arg(long)]
        strict: bool,
    },

    /// Run infinite generators with consumers until cancelled
    Generate {
        /// How long to run before cancelling everything, in milliseconds
        #[arg(long, default_value_t = 5000)]
        duration_ms: u64,

        /// Lifetime of the Apple sub-pool, in milliseconds
        #[arg(long, default_value_t = 3000)]
        subpool_timeout_ms: u64,

        /// Number of workers in the Apple sub-pool
        #[arg(long, default_value_t = 3)]
        subpool_workers: usize,
    },

    /// Release waiter threads through named events
    Events {
        /// Event names to wait for
        #[arg(default_values = ["EventA", "EventB"])]
        events: Vec<String>,

        /// Waiters per event
        #[arg(long, default_value_t = 2)]
        waiters: usize,

        /// Delay before each event is signalled, in milliseconds
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },

    /// Show a writer acquiring the lock while readers keep it busy
    Rwlock {
        /// Number of reader threads
        #[arg(long, default_value_t = 2)]
        readers: usize,

        /// How long each reader holds the lock, in milliseconds
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Letters {
            files,
            config,
            workers,
            timeout_ms,
            json,
            strict,
        } => commands::letters::run(commands::letters::LettersArgs {
            files,
            config,
            workers,
            timeout_ms,
            json,
            strict,
        }),
        Commands::Generate {
            duration_ms,
            subpool_timeout_ms,
            subpool_workers,
        } => commands::generate::run(commands::generate::GenerateArgs {
            duration_ms,
            subpool_timeout_ms,
            subpool_workers,
        }),
        Commands::Events {
            events,
            waiters,
            delay_ms,
        } => commands::events::run(commands::events::EventsArgs {
            events,
            waiters,
            delay_ms,
        }),
        Commands::Rwlock { readers, hold_ms } => {
            commands::rwlock::run(commands::rwlock::RwLockArgs { readers, hold_ms })
        }
    }
}
