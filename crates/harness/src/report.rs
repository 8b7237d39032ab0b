//! Bandwidth accounting and the JSON run report

use std::path::Path;

use bench_core::{
    AggregateStats, BackendKind, IterationMetric, RecoveredState, Result, DATA_UNIT_SIZE, MIB,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::partition::Workload;
use crate::timing::bandwidth_mib_s;

/// Accumulates iteration times and turns them into bandwidth figures
#[derive(Debug, Clone)]
pub struct BandwidthReporter {
    /// Bytes written per iteration over all ranks, if known on this rank
    bytes_per_iteration: Option<u64>,

    /// Whether this rank prints results
    verbose: bool,

    metrics: Vec<IterationMetric>,
    total_secs: f64,
}

impl BandwidthReporter {
    /// Create a reporter for `aligned_total` data units per iteration
    pub fn new(aligned_total: Option<u64>, verbose: bool) -> Self {
        Self {
            bytes_per_iteration: aligned_total
                .and_then(|units| units.checked_mul(DATA_UNIT_SIZE as u64)),
            verbose,
            metrics: Vec::new(),
            total_secs: 0.0,
        }
    }

    /// Record the time of one write
    pub fn record(&mut self, iteration: u32, elapsed_secs: f64) -> IterationMetric {
        let metric = IterationMetric {
            iteration,
            elapsed_secs,
            bandwidth_mib_s: self
                .bytes_per_iteration
                .and_then(|bytes| bandwidth_mib_s(bytes, elapsed_secs)),
        };

        if self.verbose {
            match metric.bandwidth_mib_s {
                Some(bandwidth) => info!(
                    "Time: {:.6}s, bandwidth: {:.3} MiB/s",
                    elapsed_secs, bandwidth
                ),
                None => info!("Time: {:.6}s", elapsed_secs),
            }
        }

        self.total_secs += elapsed_secs;
        self.metrics.push(metric);
        metric
    }

    pub fn metrics(&self) -> &[IterationMetric] {
        &self.metrics
    }

    /// Mean time and bandwidth over all recorded iterations
    pub fn summary(&self) -> AggregateStats {
        let iterations = self.metrics.len() as u32;
        let mean_secs = if iterations > 0 {
            self.total_secs / iterations as f64
        } else {
            0.0
        };
        let mean_bandwidth_mib_s = self.bytes_per_iteration.and_then(|bytes| {
            (self.total_secs > 0.0)
                .then(|| bytes as f64 * iterations as f64 / self.total_secs / MIB)
        });

        AggregateStats {
            iterations,
            total_secs: self.total_secs,
            mean_secs,
            mean_bandwidth_mib_s,
        }
    }

    /// Log the summary line
    pub fn log_summary(&self) -> AggregateStats {
        let summary = self.summary();
        if self.verbose {
            match summary.mean_bandwidth_mib_s {
                Some(bandwidth) => info!(
                    "Avg time: {:.6}s, avg bandwidth: {:.3} MiB/s",
                    summary.mean_secs, bandwidth
                ),
                None => info!("Avg time: {:.6}s", summary.mean_secs),
            }
        }
        summary
    }
}

/// Result of one rank's benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub rank: usize,
    pub rank_count: usize,
    pub backend: BackendKind,
    pub workload: Workload,

    /// Checkpoint found at startup, discarded by the benchmark
    pub recovered: Option<RecoveredState>,

    pub iterations: Vec<IterationMetric>,
    pub summary: AggregateStats,
    pub finished_at: DateTime<Utc>,
}

impl BenchmarkReport {
    /// Write the report as pretty-printed JSON
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Wrote benchmark report");
        Ok(())
    }
}
