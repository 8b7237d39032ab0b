//! End-to-end benchmark run with recorded collectives
//!
//! Wraps the in-process topology and the local-file backend so every barrier
//! and write lands in one shared event log, then checks the order in which
//! the timing loop issued them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bench_core::{BackendKind, BenchConfig, Real, RecoveredState};
use harness::Benchmark;
use parking_lot::Mutex;
use storage::{CheckpointBackend, CheckpointTag, Layout, PosixBackend};
use tempfile::TempDir;
use topology::{LocalTopology, LocalWorld, ProcessTopology};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Barrier,
    Open,
    Write(f64),
    Close,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct RecordingTopology {
    inner: LocalTopology,
    log: EventLog,
}

#[async_trait]
impl ProcessTopology for RecordingTopology {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    async fn barrier(&self) -> bench_core::Result<()> {
        self.log.lock().push(Event::Barrier);
        self.inner.barrier().await
    }

    async fn reduce_sum_to_root(&self, value: u64) -> bench_core::Result<Option<u64>> {
        self.inner.reduce_sum_to_root(value).await
    }

    async fn all_reduce_sum(&self, value: u64) -> bench_core::Result<u64> {
        self.inner.all_reduce_sum(value).await
    }

    async fn all_reduce_max(&self, value: u64) -> bench_core::Result<u64> {
        self.inner.all_reduce_max(value).await
    }

    async fn exclusive_scan_sum(&self, value: u64) -> bench_core::Result<u64> {
        self.inner.exclusive_scan_sum(value).await
    }
}

struct RecordingBackend {
    inner: PosixBackend,
    log: EventLog,
}

#[async_trait]
impl CheckpointBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> bench_core::Result<Option<RecoveredState>> {
        self.log.lock().push(Event::Open);
        self.inner.open(layout, buffer).await
    }

    fn next_sequence(&self) -> u64 {
        self.inner.next_sequence()
    }

    fn resume_at(&mut self, sequence: u64) {
        self.inner.resume_at(sequence)
    }

    async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> bench_core::Result<u64> {
        self.log.lock().push(Event::Write(tag.time));
        self.inner.write(data, tag).await
    }

    async fn close(&mut self) -> bench_core::Result<()> {
        self.log.lock().push(Event::Close);
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_local_file_single_rank_protocol() -> Result<()> {
    let dir = TempDir::new()?;
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let config = BenchConfig {
        backend: BackendKind::Posix,
        file_prefix: dir.path().join("ckp"),
        elements_per_rank: Some(100),
        iterations: 3,
        ..Default::default()
    };
    let topology = RecordingTopology {
        inner: LocalWorld::new(1)?.remove(0),
        log: log.clone(),
    };
    let backend = RecordingBackend {
        inner: PosixBackend::new(&config.file_prefix),
        log: log.clone(),
    };

    let report = Benchmark::with_backend(config, Box::new(backend))
        .run(&topology)
        .await?;

    let events = log.lock().clone();
    let writes: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, Event::Write(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(writes.len(), 3);

    for (iteration, &at) in writes.iter().enumerate() {
        assert_eq!(events[at], Event::Write(iteration as f64));
        assert_eq!(events[at - 1], Event::Barrier);
        assert_eq!(events[at + 1], Event::Barrier);
    }
    assert_eq!(events.first(), Some(&Event::Open));
    assert_eq!(events.last(), Some(&Event::Close));

    assert_eq!(report.workload.total_elements, Some(100));
    assert_eq!(report.iterations.len(), 3);
    assert!(report.summary.mean_bandwidth_mib_s.unwrap_or_default() > 0.0);
    Ok(())
}

#[tokio::test]
async fn test_every_rank_writes_in_lockstep() -> Result<()> {
    let dir = TempDir::new()?;
    let logs: Vec<EventLog> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

    let mut tasks = Vec::new();
    for (topology, log) in LocalWorld::new(3)?.into_iter().zip(logs.iter().cloned()) {
        let config = BenchConfig {
            backend: BackendKind::Posix,
            file_prefix: dir.path().join("ckp"),
            total_elements: Some(10),
            iterations: 2,
            aligned_dofs: 4,
            ..Default::default()
        };
        tasks.push(tokio::spawn(async move {
            let backend = RecordingBackend {
                inner: PosixBackend::new(&config.file_prefix),
                log: log.clone(),
            };
            let topology = RecordingTopology { inner: topology, log };
            Benchmark::with_backend(config, Box::new(backend))
                .run(&topology)
                .await
        }));
    }

    let mut elements = Vec::new();
    for task in tasks {
        let report = task.await??;
        elements.push(report.workload.elements_per_rank);
        assert_eq!(report.workload.aligned_total, Some(40));
    }
    assert_eq!(elements, vec![4, 4, 2]);

    // Every rank saw the same sequence of barriers and writes
    let first = logs[0].lock().clone();
    for log in &logs[1..] {
        assert_eq!(*log.lock(), first);
    }
    Ok(())
}
