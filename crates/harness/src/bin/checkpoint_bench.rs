//! Checkpoint benchmark entry point
//!
//! Built with the `mpi` feature every MPI process is one rank; otherwise
//! `--ranks` ranks run as tasks of this process.

use std::process::ExitCode;

use bench_core::Error;
use harness::{init_logging, parse_args, ParseOutcome};
use tracing::error;

/// Log a fatal error once per run
fn report_failure(err: &Error, root: bool) -> ExitCode {
    if root || !err.is_collective() {
        error!("{}", err);
    }
    ExitCode::FAILURE
}

#[cfg(not(feature = "mpi"))]
#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = match parse_args(std::env::args_os(), true) {
        Ok(ParseOutcome::Run(args)) => args,
        Ok(ParseOutcome::Exit) => return ExitCode::SUCCESS,
        Err(e) => return report_failure(&e, true),
    };

    let ranks = args.ranks;
    match harness::run_local(args.into_config(), ranks).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e, true),
    }
}

#[cfg(feature = "mpi")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    use harness::Benchmark;
    use topology::{MpiTopology, ProcessTopology};

    init_logging();

    let topology = match MpiTopology::init() {
        Ok(topology) => topology,
        Err(e) => return report_failure(&e, true),
    };
    let root = topology.is_root();

    let result = match parse_args(std::env::args_os(), root) {
        Ok(ParseOutcome::Run(args)) => Benchmark::new(args.into_config())
            .run(&topology)
            .await
            .map(|_| ()),
        Ok(ParseOutcome::Exit) => Ok(()),
        Err(e) => Err(e),
    };
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e, root),
    };

    topology.finalize();
    code
}
