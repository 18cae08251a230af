mod cli;
mod logger;
mod pipeline;
mod shuffle;
mod stats;
mod util;

use cli::{Cli, SubCommands};
use logger::Verbosity;
use pipeline::run_discovery;
use shuffle::run_shuffle;
use util::set_threads;

use clap::Parser;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() -> anyhow::Result<()> {
    color_backtrace::install();

    match Cli::parse().command {
        SubCommands::Discover(args) => {
            logger::init(Verbosity::from_args(&args.common_args));
            set_threads(args.common_args.num_threads)?;
            run_discovery(&args)?;
        }
        SubCommands::Shuffle(args) => {
            logger::init(Verbosity::from_args(&args.common_args));
            run_shuffle(&args)?;
        }
    }
    Ok(())
}
