//! In-process topology
//!
//! Runs every rank as a task of the same process. Collectives deposit each
//! rank's value in a shared slot table between two barrier rounds.

use std::sync::Arc;

use async_trait::async_trait;
use bench_core::{Error, Result, ROOT_RANK};
use parking_lot::Mutex;
use tokio::sync::Barrier;
use tracing::debug;

use crate::collective::checked_sum;
use crate::ProcessTopology;

/// State shared by all ranks of a [`LocalWorld`]
#[derive(Debug)]
struct Shared {
    /// Barrier sized to the number of ranks
    barrier: Barrier,

    /// One contribution slot per rank
    slots: Mutex<Vec<u64>>,
}

/// Factory for in-process rank handles
pub struct LocalWorld;

impl LocalWorld {
    /// Create the handles of a world with `size` ranks
    ///
    /// Handle `i` has rank `i`. Each handle is meant to be moved into its
    /// own task.
    pub fn new(size: usize) -> Result<Vec<LocalTopology>> {
        if size == 0 {
            return Err(Error::config("A run needs at least one rank"));
        }

        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![0; size]),
        });
        debug!(size, "Created local world");

        Ok((0..size)
            .map(|rank| LocalTopology {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect())
    }
}

/// Handle of one rank inside a [`LocalWorld`]
#[derive(Debug)]
pub struct LocalTopology {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl LocalTopology {
    /// Publish `value`, wait for all peers, then combine every contribution.
    ///
    /// The second barrier keeps a fast rank from overwriting its slot in the
    /// next collective while a slow rank is still reading this one.
    async fn exchange<F, R>(&self, value: u64, combine: F) -> Result<R>
    where
        F: FnOnce(&[u64]) -> R + Send,
        R: Send,
    {
        self.shared.slots.lock()[self.rank] = value;
        self.shared.barrier.wait().await;
        let result = combine(&self.shared.slots.lock());
        self.shared.barrier.wait().await;
        Ok(result)
    }
}

#[async_trait]
impl ProcessTopology for LocalTopology {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }

    async fn reduce_sum_to_root(&self, value: u64) -> Result<Option<u64>> {
        // Every rank checks the sum so an overflow fails the whole world
        let is_root = self.rank == ROOT_RANK;
        let sum = self.exchange(value, checked_sum).await??;
        Ok(is_root.then_some(sum))
    }

    async fn all_reduce_sum(&self, value: u64) -> Result<u64> {
        self.exchange(value, checked_sum).await?
    }

    async fn all_reduce_max(&self, value: u64) -> Result<u64> {
        self.exchange(value, |slots| slots.iter().copied().max().unwrap_or(0)).await
    }

    async fn exclusive_scan_sum(&self, value: u64) -> Result<u64> {
        let rank = self.rank;
        self.exchange(value, move |slots| checked_sum(&slots[..rank])).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_world<F, Fut, R>(size: usize, body: F) -> Vec<R>
    where
        F: Fn(LocalTopology) -> Fut,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let handles: Vec<_> = LocalWorld::new(size)
            .unwrap()
            .into_iter()
            .map(|rank| tokio::spawn(body(rank)))
            .collect();

        let mut results = Vec::with_capacity(size);
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[test]
    fn test_empty_world_rejected() {
        assert!(matches!(
            LocalWorld::new(0),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_rank() {
        let rank = LocalWorld::new(1).unwrap().remove(0);
        assert!(rank.is_root());
        assert!(rank.is_last());

        rank.barrier().await.unwrap();
        assert_eq!(rank.reduce_sum_to_root(5).await.unwrap(), Some(5));
        assert_eq!(rank.exclusive_scan_sum(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reduce_only_on_root() {
        let results = run_world(4, |rank| async move {
            let total = rank.reduce_sum_to_root(5).await.unwrap();
            (rank.rank(), total)
        })
        .await;

        for (rank, total) in results {
            if rank == ROOT_RANK {
                assert_eq!(total, Some(20));
            } else {
                assert_eq!(total, None);
            }
        }
    }

    #[tokio::test]
    async fn test_scan_and_all_reduce() {
        let results = run_world(4, |rank| async move {
            let value = (rank.rank() as u64 + 1) * 10;
            let offset = rank.exclusive_scan_sum(value).await.unwrap();
            let total = rank.all_reduce_sum(value).await.unwrap();
            let max = rank.all_reduce_max(value).await.unwrap();
            (offset, total, max)
        })
        .await;

        let offsets: Vec<_> = results.iter().map(|r| r.0).collect();
        assert_eq!(offsets, vec![0, 10, 30, 60]);
        assert!(results.iter().all(|r| r.1 == 100 && r.2 == 40));
    }

    #[tokio::test]
    async fn test_back_to_back_collectives() {
        let results = run_world(3, |rank| async move {
            let mut sums = Vec::new();
            for round in 0..20u64 {
                sums.push(rank.all_reduce_sum(round + rank.rank() as u64).await.unwrap());
            }
            sums
        })
        .await;

        for sums in results {
            for (round, sum) in sums.into_iter().enumerate() {
                assert_eq!(sum, 3 * round as u64 + 3);
            }
        }
    }

    #[tokio::test]
    async fn test_overflowing_sum_fails_every_rank() {
        let world = run_world(2, |rank| async move {
            let reduced = rank.reduce_sum_to_root(1 << 63).await;
            let all = rank.all_reduce_sum(1 << 63).await;
            // The world is still usable afterwards
            let max = rank.all_reduce_max(rank.rank() as u64).await;
            (reduced.is_err(), all.is_err(), max.unwrap())
        });
        let results = tokio::time::timeout(std::time::Duration::from_secs(5), world)
            .await
            .expect("ranks deadlocked on an overflowing sum");

        assert!(results.iter().all(|&(reduced, all, max)| reduced && all && max == 1));
    }
}
