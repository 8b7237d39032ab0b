//! MPI topology
//!
//! Maps the collectives onto `MPI_COMM_WORLD`. MPI calls block the calling
//! thread, so each rank should drive its benchmark from a single task.

use async_trait::async_trait;
use bench_core::{Error, Result, ROOT_RANK};
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use tracing::{debug, info};

use crate::collective::checked_sum;
use crate::ProcessTopology;

/// Rank handle backed by an initialized MPI environment
///
/// Dropping the handle finalizes MPI, so it must outlive every collective
/// call and should be dropped on error paths too.
pub struct MpiTopology {
    universe: Universe,
    rank: usize,
    size: usize,
}

impl MpiTopology {
    /// Initialize MPI
    pub fn init() -> Result<Self> {
        let universe = mpi::initialize().ok_or_else(|| Error::Topology {
            message: "MPI is already initialized".to_string(),
        })?;

        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        debug!(rank, size, "MPI initialized");

        Ok(Self {
            universe,
            rank,
            size,
        })
    }

    /// Tear down MPI after all ranks reached this point
    pub fn finalize(self) {
        self.world().barrier();
        if self.rank == ROOT_RANK {
            info!("Finalizing MPI");
        }
        drop(self);
    }

    fn world(&self) -> SimpleCommunicator {
        self.universe.world()
    }

    /// Every rank's value, indexed by rank
    ///
    /// MPI sum reductions wrap on overflow, so sums are taken from these.
    fn gather(&self, value: u64) -> Vec<u64> {
        let mut values = vec![0u64; self.size];
        self.world().all_gather_into(&value, &mut values[..]);
        values
    }
}

#[async_trait]
impl ProcessTopology for MpiTopology {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn barrier(&self) -> Result<()> {
        self.world().barrier();
        Ok(())
    }

    async fn reduce_sum_to_root(&self, value: u64) -> Result<Option<u64>> {
        // Every rank checks the sum so an overflow fails the whole world
        let sum = checked_sum(&self.gather(value))?;
        Ok((self.rank == ROOT_RANK).then_some(sum))
    }

    async fn all_reduce_sum(&self, value: u64) -> Result<u64> {
        checked_sum(&self.gather(value))
    }

    async fn all_reduce_max(&self, value: u64) -> Result<u64> {
        let mut max = 0u64;
        self.world()
            .all_reduce_into(&value, &mut max, SystemOperation::max());
        Ok(max)
    }

    async fn exclusive_scan_sum(&self, value: u64) -> Result<u64> {
        let values = self.gather(value);
        checked_sum(&values[..self.rank])
    }
}
