//! Distribution of elements over ranks

use bench_core::{BenchConfig, Error, Result};
use serde::{Deserialize, Serialize};
use topology::ProcessTopology;
use tracing::{debug, warn};

/// Which element count drives the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// Every rank holds this many elements
    PerRank(u64),

    /// This many elements are split over all ranks
    Global(u64),
}

impl Sizing {
    /// Pick the authoritative count of `config`
    ///
    /// # Returns
    /// The sizing and whether a global count was given but overridden
    pub fn from_config(config: &BenchConfig) -> Result<(Self, bool)> {
        match (config.elements(), config.total()) {
            (Some(per_rank), total) => Ok((Sizing::PerRank(per_rank), total.is_some())),
            (None, Some(total)) => Ok((Sizing::Global(total), false)),
            (None, None) => Err(Error::config(
                "Elements per rank or total number of elements required",
            )),
        }
    }
}

/// Element shares of all ranks for a global count
///
/// Every rank but the last gets `ceil(total / ranks)`, the last rank gets
/// the rest.
pub fn shares(total: u64, ranks: usize) -> Result<Vec<u64>> {
    let last = share_of_total(total, ranks, ranks.saturating_sub(1))?;
    let base = total.div_ceil(ranks as u64);

    let mut shares = vec![base; ranks - 1];
    shares.push(last);
    Ok(shares)
}

/// Element share of `rank` for a global count
pub fn share_of_total(total: u64, ranks: usize, rank: usize) -> Result<u64> {
    if ranks == 0 {
        return Err(Error::config("A run needs at least one rank"));
    }

    let base = total.div_ceil(ranks as u64);
    if rank + 1 < ranks {
        return Ok(base);
    }

    base.checked_mul(ranks as u64 - 1)
        .and_then(|others| total.checked_sub(others))
        .ok_or_else(|| {
            Error::config(format!(
                "{} elements cannot be distributed over {} ranks",
                total, ranks
            ))
        })
}

/// Element counts of one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Elements held by this rank
    pub elements_per_rank: u64,

    /// Elements over all ranks, absent where this rank has no authoritative total
    pub total_elements: Option<u64>,

    /// Data units per element
    pub aligned_dofs: u64,

    /// Data units held by this rank
    pub aligned_local: u64,

    /// Data units over all ranks
    pub aligned_total: Option<u64>,
}

impl Workload {
    /// Scale element counts to data units
    pub fn new(
        elements_per_rank: u64,
        total_elements: Option<u64>,
        aligned_dofs: u64,
    ) -> Result<Self> {
        let scale = |elements: u64| {
            elements.checked_mul(aligned_dofs).ok_or_else(|| {
                Error::config(format!(
                    "{} elements of {} data units exceed the addressable size",
                    elements, aligned_dofs
                ))
            })
        };

        Ok(Self {
            elements_per_rank,
            total_elements,
            aligned_dofs,
            aligned_local: scale(elements_per_rank)?,
            aligned_total: total_elements.map(scale).transpose()?,
        })
    }

    /// Local buffer length
    pub fn local_len(&self) -> Result<usize> {
        usize::try_from(self.aligned_local).map_err(|_| {
            Error::config(format!(
                "Buffer of {} data units too large",
                self.aligned_local
            ))
        })
    }
}

/// Compute the workload of this rank
///
/// Collective: with a per-rank count the total is reduced to the root rank.
pub async fn partition<T>(topology: &T, config: &BenchConfig) -> Result<Workload>
where
    T: ProcessTopology + ?Sized,
{
    let (sizing, overridden) = Sizing::from_config(config)?;
    if overridden && topology.is_root() {
        warn!(
            "Elements per rank and total number of elements set, \
             ignoring total number of elements"
        );
    }

    let (elements, total) = match sizing {
        Sizing::PerRank(elements) => (elements, topology.reduce_sum_to_root(elements).await?),
        Sizing::Global(total) => (
            share_of_total(total, topology.size(), topology.rank())?,
            Some(total),
        ),
    };

    let workload = Workload::new(elements, total, config.aligned_dofs)?;
    debug!(rank = topology.rank(), ?workload, "Partitioned workload");
    Ok(workload)
}
