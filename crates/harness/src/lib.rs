//! Harness - Checkpoint write bandwidth benchmark
//!
//! Splits a mesh of elements over the ranks of a run, fills each rank's
//! degree-of-freedom buffer with a reproducible pattern and times collective
//! checkpoint writes between two barriers.
//!
//! # Example
//!
//! ```no_run
//! use bench_core::{BackendKind, BenchConfig};
//!
//! # async fn example() -> bench_core::Result<()> {
//! let config = BenchConfig {
//!     backend: BackendKind::Mpio,
//!     file_prefix: "/tmp/checkpoint".into(),
//!     total_elements: Some(10_000),
//!     ..Default::default()
//! };
//! let reports = harness::run_local(config, 4).await?;
//! println!("{:?}", reports[0].summary.mean_bandwidth_mib_s);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cli;
pub mod logging;
pub mod partition;
pub mod report;
pub mod runner;
pub mod timing;

pub use buffer::DofBuffer;
pub use cli::{parse_args, Args, ParseOutcome};
pub use logging::init_logging;
pub use partition::{partition, share_of_total, shares, Sizing, Workload};
pub use report::{BandwidthReporter, BenchmarkReport};
pub use runner::{run_local, Benchmark};
pub use timing::{bandwidth_mib_s, Stopwatch};
