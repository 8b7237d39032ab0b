//! Process topology trait definition
//!
//! Defines the collective interface every rank of a benchmark run uses.

use async_trait::async_trait;
use bench_core::{Error, Result, ROOT_RANK};

/// Async trait for a set of cooperating ranks
///
/// Every method except [`rank`](ProcessTopology::rank) and
/// [`size`](ProcessTopology::size) is collective: all ranks must call it
/// in the same round and in the same order, otherwise the run deadlocks.
#[async_trait]
pub trait ProcessTopology: Send + Sync {
    /// Index of this rank in `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the run
    fn size(&self) -> usize;

    /// Whether this rank receives reductions and reports results
    fn is_root(&self) -> bool {
        self.rank() == ROOT_RANK
    }

    /// Whether this is the highest rank
    fn is_last(&self) -> bool {
        self.rank() + 1 == self.size()
    }

    /// Block until every rank has arrived
    async fn barrier(&self) -> Result<()>;

    /// Sum `value` over all ranks
    ///
    /// # Returns
    /// `Some(sum)` on the root rank, `None` everywhere else
    async fn reduce_sum_to_root(&self, value: u64) -> Result<Option<u64>>;

    /// Sum `value` over all ranks, result on every rank
    async fn all_reduce_sum(&self, value: u64) -> Result<u64>;

    /// Maximum of `value` over all ranks, result on every rank
    async fn all_reduce_max(&self, value: u64) -> Result<u64>;

    /// Sum of `value` over all lower ranks (0 on rank 0)
    async fn exclusive_scan_sum(&self, value: u64) -> Result<u64>;
}

/// Make every rank see a failure that happened on any of them
///
/// Collective. Ranks pass their local outcome of a step; if any rank
/// failed, the ranks that succeeded return [`Error::PeerFailed`] instead,
/// so all of them leave the run at the same point. The failing rank keeps
/// its own error.
pub async fn agree<T, R>(topology: &T, outcome: Result<R>) -> Result<R>
where
    T: ProcessTopology + ?Sized,
    R: Send,
{
    let failed = topology.all_reduce_max(u64::from(outcome.is_err())).await?;
    match outcome {
        Ok(_) if failed > 0 => Err(Error::PeerFailed),
        outcome => outcome,
    }
}

/// Sum over ranks, rejecting totals that do not fit in 64 bits
pub(crate) fn checked_sum(values: &[u64]) -> Result<u64> {
    values
        .iter()
        .try_fold(0u64, |acc, &v| acc.checked_add(v))
        .ok_or_else(|| Error::config("Sum over ranks exceeds 64 bits"))
}
