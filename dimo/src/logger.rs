use colored::Colorize;
use log::{Level, LevelFilter, Metadata, Record};

use crate::cli::CommonArgs;

/// How much progress reporting the user asked for. Verbosity gates
/// diagnostics only; it never changes what the pipeline computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Info,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_args(args: &CommonArgs) -> Self {
        if args.quiet {
            Verbosity::Quiet
        } else {
            match args.verbose {
                0 => Verbosity::Info,
                1 => Verbosity::Verbose,
                _ => Verbosity::Debug,
            }
        }
    }

    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Verbose => LevelFilter::Debug,
            Verbosity::Debug => LevelFilter::Trace,
        }
    }
}

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => eprintln!("{} {}", "error:".red().bold(), record.args()),
            Level::Warn => eprintln!("{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => eprintln!("{}", record.args()),
            Level::Debug | Level::Trace => eprintln!("{} {}", "debug:".dimmed(), record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

pub fn init(verbosity: Verbosity) {
    // a second init (e.g. from tests) keeps the first logger
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(verbosity.level_filter());
}
