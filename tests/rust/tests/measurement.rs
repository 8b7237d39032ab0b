//! Partitioning and bandwidth arithmetic on small known inputs

use anyhow::Result;
use bench_core::{BenchConfig, Error};
use harness::{bandwidth_mib_s, partition, shares, BandwidthReporter, DofBuffer};
use topology::LocalWorld;

#[tokio::test]
async fn test_per_rank_elements_sum_on_root() -> Result<()> {
    let config = BenchConfig {
        elements_per_rank: Some(5),
        ..Default::default()
    };

    let mut tasks = Vec::new();
    for topology in LocalWorld::new(4)? {
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            partition(&topology, &config).await
        }));
    }

    let mut totals = Vec::new();
    for task in tasks {
        totals.push(task.await??.total_elements);
    }
    assert_eq!(totals, vec![Some(20), None, None, None]);
    Ok(())
}

#[tokio::test]
async fn test_both_counts_prefer_per_rank() -> Result<()> {
    let config = BenchConfig {
        elements_per_rank: Some(7),
        total_elements: Some(1000),
        ..Default::default()
    };
    let topology = LocalWorld::new(1)?.remove(0);

    let workload = partition(&topology, &config).await?;
    assert_eq!(workload.elements_per_rank, 7);
    assert_eq!(workload.total_elements, Some(7));
    Ok(())
}

#[tokio::test]
async fn test_missing_counts_rejected() -> Result<()> {
    let topology = LocalWorld::new(1)?.remove(0);
    let err = partition(&topology, &BenchConfig::default()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    Ok(())
}

#[test]
fn test_ten_elements_over_three_ranks() -> Result<()> {
    let shares = shares(10, 3)?;
    assert_eq!(shares, vec![4, 4, 2]);
    assert_eq!(shares.iter().sum::<u64>(), 10);
    Ok(())
}

#[test]
fn test_one_mib_in_one_second() {
    assert_eq!(bandwidth_mib_s(1024 * 1024, 1.0), Some(1.0));

    let mut reporter = BandwidthReporter::new(Some(1024 * 1024 / 8), false);
    assert_eq!(reporter.record(0, 1.0).bandwidth_mib_s, Some(1.0));
    assert_eq!(reporter.summary().mean_bandwidth_mib_s, Some(1.0));
}

#[test]
fn test_fill_matches_formula() {
    let mut buffer = DofBuffer::new(1000);
    buffer.fill(4);
    let snapshot = buffer.clone();
    buffer.fill(4);

    assert_eq!(buffer, snapshot);
    for (j, value) in buffer.as_slice().iter().enumerate() {
        assert_eq!(*value, (4 * 1000 + j) as f64);
    }
}
