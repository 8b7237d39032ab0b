//! Command line interface

use std::ffi::OsString;
use std::path::PathBuf;

use bench_core::config::{DEFAULT_ALIGNED_DOFS, DEFAULT_ITERATIONS};
use bench_core::{BackendKind, BenchConfig, Error, Result};
use clap::error::ErrorKind;
use clap::Parser;

/// Checkpoint write bandwidth benchmark
#[derive(Parser, Debug, Clone)]
#[command(name = "checkpoint-bench", author, version, about)]
pub struct Args {
    /// Checkpoint back-end
    #[arg(short, long, value_enum)]
    pub backend: BackendKind,

    /// Checkpoint file name prefix
    #[arg(short, long)]
    pub file: PathBuf,

    /// Elements per rank
    #[arg(short, long)]
    pub elements: Option<u64>,

    /// Total number of elements over all ranks
    #[arg(short, long)]
    pub total: Option<u64>,

    /// Number of timed iterations
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u32,

    /// Data units per element
    #[arg(long, default_value_t = DEFAULT_ALIGNED_DOFS)]
    pub aligned_dofs: u64,

    /// Ranks to run in this process (ignored under MPI)
    #[arg(long, default_value_t = 1)]
    pub ranks: usize,

    /// Write the root rank's JSON report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl Args {
    pub fn into_config(self) -> BenchConfig {
        BenchConfig {
            backend: self.backend,
            file_prefix: self.file,
            elements_per_rank: self.elements,
            total_elements: self.total,
            iterations: self.iterations,
            aligned_dofs: self.aligned_dofs,
            report_path: self.report,
        }
    }
}

/// Result of parsing the command line
#[derive(Debug)]
pub enum ParseOutcome {
    /// Arguments are complete, run the benchmark
    Run(Args),

    /// Help or version was requested, stop with exit code 0
    Exit,
}

/// Parse `args`, printing help and version output only if `print` is set
///
/// Usage errors are returned as [`Error::Parse`] carrying clap's rendered
/// message, so they are reported like any other collective error.
pub fn parse_args<I, T>(args: I, print: bool) -> Result<ParseOutcome>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(args) {
        Ok(args) => Ok(ParseOutcome::Run(args)),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                if print {
                    let _ = e.print();
                }
                Ok(ParseOutcome::Exit)
            }
            _ => Err(Error::Parse {
                message: e.render().to_string().trim_end().to_string(),
            }),
        },
    }
}
