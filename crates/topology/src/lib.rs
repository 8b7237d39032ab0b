//! Topology - Process layout and collectives for the checkpoint benchmark
//!
//! Every rank of a run holds one [`ProcessTopology`] handle. Two
//! implementations are provided:
//! - [`LocalWorld`]: ranks are tasks inside one process (default)
//! - `MpiTopology`: ranks are MPI processes (with the `mpi` feature)
//!
//! # Example
//!
//! ```no_run
//! use topology::{LocalWorld, ProcessTopology};
//!
//! # async fn example() -> bench_core::Result<()> {
//! let mut ranks = LocalWorld::new(1)?;
//! let rank = ranks.remove(0);
//! rank.barrier().await?;
//! let total = rank.reduce_sum_to_root(5).await?;
//! assert_eq!(total, Some(5));
//! # Ok(())
//! # }
//! ```

mod collective;
mod local;
#[cfg(feature = "mpi")]
mod mpi_world;

pub use collective::{agree, ProcessTopology};
pub use local::{LocalTopology, LocalWorld};

#[cfg(feature = "mpi")]
pub use mpi_world::MpiTopology;
