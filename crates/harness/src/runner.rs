//! Timed checkpoint write loop

use bench_core::{BenchConfig, Error, Result};
use checkpoint::CheckpointSession;
use chrono::Utc;
use storage::CheckpointBackend;
use tokio::task::JoinSet;
use topology::{agree, LocalWorld, ProcessTopology};
use tracing::{debug, info};

use crate::buffer::DofBuffer;
use crate::partition::partition;
use crate::report::{BandwidthReporter, BenchmarkReport};
use crate::timing::Stopwatch;

/// One rank's benchmark run
pub struct Benchmark {
    config: BenchConfig,

    /// Backend replacing the configured kind
    backend: Option<Box<dyn CheckpointBackend>>,
}

impl Benchmark {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Run against a caller-provided backend instead of `config.backend`
    pub fn with_backend(config: BenchConfig, backend: Box<dyn CheckpointBackend>) -> Self {
        Self {
            config,
            backend: Some(backend),
        }
    }

    /// Partition, open the checkpoint, time every write and close
    ///
    /// Collective over `topology`. A failure on one rank after partitioning
    /// is shared with the others at the next agreement point, so every rank
    /// stops at the same step. The root rank logs progress and writes the
    /// JSON report if one was requested.
    pub async fn run<T>(mut self, topology: &T) -> Result<BenchmarkReport>
    where
        T: ProcessTopology + ?Sized,
    {
        self.config.validate()?;
        let root = topology.is_root();

        // The last rank alone may reject its share of the total
        let sized = partition(topology, &self.config)
            .await
            .and_then(|workload| Ok((workload.local_len()?, workload)));
        let (local_len, workload) = agree(topology, sized).await?;
        let mut buffer = DofBuffer::new(local_len);

        let mut session = CheckpointSession::new();
        match self.backend.take() {
            Some(backend) => session.configure_backend(backend)?,
            None => session.configure(self.config.backend, &self.config.file_prefix)?,
        }
        let backend = session.backend_kind().unwrap_or(self.config.backend);

        if root {
            info!(
                backend = %backend,
                ranks = topology.size(),
                elements = ?workload.total_elements,
                iterations = self.config.iterations,
                "Starting checkpoint benchmark"
            );
        }

        let recovered = session.init(topology, buffer.as_mut_slice()).await?;
        if let Some(state) = &recovered {
            debug!(?state, "Discarding recovered checkpoint");
        }

        let mut reporter = BandwidthReporter::new(workload.aligned_total, root);
        for iteration in 0..self.config.iterations {
            if root {
                info!("Iteration {}", iteration);
            }
            buffer.fill(u64::from(iteration));

            topology.barrier().await?;
            let watch = Stopwatch::start();
            let written = session
                .write(buffer.as_slice(), u64::from(iteration), 0, 0)
                .await;
            topology.barrier().await?;
            let elapsed = watch.elapsed_secs();
            agree(topology, written).await?;

            reporter.record(iteration, elapsed);
        }
        let summary = reporter.log_summary();

        let closed = session.close().await;
        agree(topology, closed).await?;

        let report = BenchmarkReport {
            rank: topology.rank(),
            rank_count: topology.size(),
            backend,
            workload,
            recovered,
            iterations: reporter.metrics().to_vec(),
            summary,
            finished_at: Utc::now(),
        };
        if let (true, Some(path)) = (root, &self.config.report_path) {
            report.write_json(path).await?;
        }
        Ok(report)
    }
}

/// Run the benchmark with `ranks` in-process ranks
///
/// # Returns
/// The report of every rank, ordered by rank. If a rank fails, the error it
/// raised is returned rather than the [`Error::PeerFailed`] of its peers,
/// and the remaining ranks are cancelled.
pub async fn run_local(config: BenchConfig, ranks: usize) -> Result<Vec<BenchmarkReport>> {
    let mut tasks = JoinSet::new();
    for topology in LocalWorld::new(ranks)? {
        let config = config.clone();
        tasks.spawn(async move {
            let rank = topology.rank();
            (rank, Benchmark::new(config).run(&topology).await)
        });
    }

    let mut reports = Vec::with_capacity(ranks);
    while let Some(joined) = tasks.join_next().await {
        let (rank, result) = joined.map_err(|e| Error::Internal {
            message: format!("Benchmark rank task failed: {}", e),
        })?;

        match result {
            Ok(report) => reports.push(report),
            // The failing rank reports the cause
            Err(Error::PeerFailed) => continue,
            Err(e) => {
                // Peers may be blocked in a collective the failed rank never reaches
                tasks.abort_all();
                debug!(rank, error = %e, "Cancelled remaining ranks");
                return Err(e);
            }
        }
    }

    if reports.len() < ranks {
        return Err(Error::PeerFailed);
    }
    reports.sort_by_key(|report| report.rank);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bench_core::{BackendKind, Real, RecoveredState};
    use std::time::Duration;
    use storage::{CheckpointTag, Layout, PosixBackend};
    use tempfile::TempDir;

    /// Local-file backend that fails one chosen write
    struct FailingBackend {
        inner: PosixBackend,
        fail_at: Option<f64>,
    }

    #[async_trait]
    impl CheckpointBackend for FailingBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        async fn open(
            &mut self,
            layout: &Layout,
            buffer: &mut [Real],
        ) -> Result<Option<RecoveredState>> {
            self.inner.open(layout, buffer).await
        }

        fn next_sequence(&self) -> u64 {
            self.inner.next_sequence()
        }

        fn resume_at(&mut self, sequence: u64) {
            self.inner.resume_at(sequence)
        }

        async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> Result<u64> {
            if self.fail_at == Some(tag.time) {
                return Err(Error::storage("disk full"));
            }
            self.inner.write(data, tag).await
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.close().await
        }
    }

    fn config(dir: &TempDir, backend: BackendKind) -> BenchConfig {
        BenchConfig {
            backend,
            file_prefix: dir.path().join("ckp"),
            elements_per_rank: Some(4),
            iterations: 3,
            aligned_dofs: 8,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_rank_run() {
        let dir = TempDir::new().unwrap();
        let reports = run_local(config(&dir, BackendKind::Posix), 1).await.unwrap();

        let report = &reports[0];
        assert_eq!(report.workload.aligned_total, Some(32));
        assert_eq!(report.iterations.len(), 3);
        assert_eq!(report.summary.iterations, 3);
        assert!(report.summary.mean_bandwidth_mib_s.unwrap() > 0.0);
        assert!(report.recovered.is_none());
    }

    #[tokio::test]
    async fn test_second_run_recovers_last_iteration() {
        let dir = TempDir::new().unwrap();
        run_local(config(&dir, BackendKind::Sionlib), 2).await.unwrap();

        let reports = run_local(config(&dir, BackendKind::Sionlib), 2).await.unwrap();
        for report in reports {
            assert_eq!(report.recovered.map(|s| s.time), Some(2.0));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_every_rank() {
        let dir = TempDir::new().unwrap();
        let config = BenchConfig {
            elements_per_rank: None,
            ..config(&dir, BackendKind::Posix)
        };
        let err = run_local(config, 3).await.unwrap_err();
        assert!(err.is_collective());
    }

    #[tokio::test]
    async fn test_report_written_by_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let config = BenchConfig {
            report_path: Some(path.clone()),
            ..config(&dir, BackendKind::Hdf5)
        };
        run_local(config, 2).await.unwrap();

        let report: BenchmarkReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(report.rank, 0);
        assert_eq!(report.rank_count, 2);
        assert_eq!(report.backend, BackendKind::Hdf5);
    }

    #[tokio::test]
    async fn test_failed_write_stops_every_rank() {
        let dir = TempDir::new().unwrap();
        let mut tasks = Vec::new();
        for topology in LocalWorld::new(3).unwrap() {
            let config = config(&dir, BackendKind::Posix);
            tasks.push(tokio::spawn(async move {
                let backend = FailingBackend {
                    inner: PosixBackend::new(&config.file_prefix),
                    fail_at: (topology.rank() == 1).then_some(1.0),
                };
                let result = Benchmark::with_backend(config, Box::new(backend))
                    .run(&topology)
                    .await;
                // Ranks that stopped together can still meet in a collective
                topology.barrier().await.unwrap();
                (topology.rank(), result)
            }));
        }

        let results = tokio::time::timeout(Duration::from_secs(10), async {
            let mut results = Vec::new();
            for task in tasks {
                results.push(task.await.unwrap());
            }
            results
        })
        .await
        .expect("ranks deadlocked after a failed write");

        for (rank, result) in results {
            match (rank, result) {
                (1, Err(Error::Storage { .. })) => {}
                (0 | 2, Err(Error::PeerFailed)) => {}
                (rank, other) => panic!("rank {} ended with {:?}", rank, other.err()),
            }
        }
    }

    #[tokio::test]
    async fn test_sum_overflow_fails_every_rank() {
        let dir = TempDir::new().unwrap();
        let config = BenchConfig {
            elements_per_rank: Some(1 << 63),
            aligned_dofs: 1,
            ..config(&dir, BackendKind::Posix)
        };

        let run = run_local(config, 2);
        let err = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("ranks deadlocked on an overflowing sum")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_rejected_last_share_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = BenchConfig {
            elements_per_rank: None,
            total_elements: Some(5),
            aligned_dofs: 1,
            ..config(&dir, BackendKind::Posix)
        };

        // 5 over 4 ranks leaves the last rank a negative share
        let err = run_local(config, 4).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
