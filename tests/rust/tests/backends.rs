//! Every backend, written by one and by four ranks, then recovered

use anyhow::Result;
use bench_core::{BackendKind, BenchConfig};
use checkpoint::CheckpointSession;
use harness::{run_local, DofBuffer};
use tempfile::TempDir;
use topology::{LocalWorld, ProcessTopology};

const ITERATIONS: u32 = 3;

fn config(dir: &TempDir, backend: BackendKind) -> BenchConfig {
    BenchConfig {
        backend,
        file_prefix: dir.path().join("run/ckp"),
        total_elements: Some(23),
        iterations: ITERATIONS,
        aligned_dofs: 9,
        ..Default::default()
    }
}

/// Open a fresh session on every rank and check what it recovers
async fn verify_recovery(config: &BenchConfig, ranks: usize) -> Result<()> {
    let mut tasks = Vec::new();
    for topology in LocalWorld::new(ranks)? {
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let workload = harness::partition(&topology, &config).await?;
            let mut buffer = DofBuffer::new(workload.local_len()?);

            let mut session = CheckpointSession::new();
            session.configure(config.backend, &config.file_prefix)?;
            let recovered = session.init(&topology, buffer.as_mut_slice()).await?;
            session.close().await?;
            bench_core::Result::Ok((topology.rank(), recovered, buffer))
        }));
    }

    let last = u64::from(ITERATIONS - 1);
    for task in tasks {
        let (rank, recovered, buffer) = task.await??;
        let state = recovered.ok_or_else(|| anyhow::anyhow!("rank {} recovered nothing", rank))?;
        assert_eq!(state.time, last as f64, "rank {}", rank);
        assert_eq!(buffer.verify(last), None, "rank {}", rank);
    }
    Ok(())
}

async fn round_trip(backend: BackendKind, ranks: usize) -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(&dir, backend);

    let reports = run_local(config.clone(), ranks).await?;
    assert_eq!(reports.len(), ranks);
    for report in &reports {
        assert_eq!(report.backend, backend);
        assert_eq!(report.iterations.len(), ITERATIONS as usize);
        assert_eq!(report.workload.total_elements, Some(23));
    }
    assert!(reports[0].summary.mean_bandwidth_mib_s.unwrap_or_default() > 0.0);

    verify_recovery(&config, ranks).await
}

#[tokio::test]
async fn test_posix_round_trip() -> Result<()> {
    round_trip(BackendKind::Posix, 1).await?;
    round_trip(BackendKind::Posix, 4).await
}

#[tokio::test]
async fn test_hdf5_round_trip() -> Result<()> {
    round_trip(BackendKind::Hdf5, 1).await?;
    round_trip(BackendKind::Hdf5, 4).await
}

#[tokio::test]
async fn test_mpio_round_trip() -> Result<()> {
    round_trip(BackendKind::Mpio, 1).await?;
    round_trip(BackendKind::Mpio, 4).await
}

#[tokio::test]
async fn test_mpio_async_round_trip() -> Result<()> {
    round_trip(BackendKind::MpioAsync, 1).await?;
    round_trip(BackendKind::MpioAsync, 4).await
}

#[tokio::test]
async fn test_sionlib_round_trip() -> Result<()> {
    round_trip(BackendKind::Sionlib, 1).await?;
    round_trip(BackendKind::Sionlib, 4).await
}

#[tokio::test]
async fn test_rank_count_change_starts_fresh() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(&dir, BackendKind::Sionlib);
    run_local(config.clone(), 2).await?;

    let reports = run_local(config, 3).await?;
    assert!(reports.iter().all(|r| r.recovered.is_none()));
    Ok(())
}
