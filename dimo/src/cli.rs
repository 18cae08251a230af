use crate::pipeline::DiscoverArgs;
use crate::shuffle::ShuffleArgs;
use clap::{Args, Parser, Subcommand};

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// The number of threads to use
    #[arg(
        short = 't',
        long = "threads",
        default_value_t = 8usize,
        value_name = "n"
    )]
    pub num_threads: usize,

    /// Print more diagnostics; may be given twice
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    pub quiet: bool,

    /// Allow overwriting output files
    #[arg(long = "allow-overwrite", default_value_t = false)]
    pub allow_overwrite: bool,
}

#[derive(Subcommand)]
pub enum SubCommands {
    #[command(about = "Discover motifs that discriminate between sequence collections")]
    Discover(DiscoverArgs),
    #[command(about = "Generate dinucleotide frequency preserving shuffles of FASTA files")]
    Shuffle(ShuffleArgs),
}

#[derive(Parser)]
#[command(name = "dimo")]
#[command(
    about = "Discover sequence motifs that discriminate between sequence collections, using hidden Markov models"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: SubCommands,
}
