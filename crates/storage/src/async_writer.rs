//! Non-blocking checkpoint writes
//!
//! [`AsyncBackend`] snapshots the caller's data and hands it to a writer task
//! that owns the wrapped backend. At most one write is outstanding: starting
//! a new write first waits for the previous one, and `flush` waits for all.

use async_trait::async_trait;
use bench_core::{BackendKind, Error, Real, RecoveredState, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::format;
use crate::{CheckpointBackend, CheckpointTag, Layout};

/// Writes allowed in flight before `write` blocks
const MAX_IN_FLIGHT: usize = 1;

/// Request to write one checkpoint
#[derive(Debug)]
pub struct WriteRequest {
    /// Snapshot of the caller's data
    pub data: Vec<Real>,

    /// Simulation tag stored with the checkpoint
    pub tag: CheckpointTag,
}

/// Event reported by the writer task
#[derive(Debug)]
pub enum WriterEvent {
    /// Write completed, snapshot returned for reuse
    Completed { bytes: u64, buffer: Vec<Real> },
    /// Write failed
    Failed { error: String },
}

/// Running writer task and its channels
struct Writer<B> {
    tx: mpsc::Sender<WriteRequest>,
    events: mpsc::Receiver<WriterEvent>,
    task: JoinHandle<B>,
}

/// Backend wrapper that overlaps checkpoint writes with computation
pub struct AsyncBackend<B: CheckpointBackend + 'static> {
    kind: BackendKind,

    /// Wrapped backend while no writer task owns it
    inner: Option<B>,

    writer: Option<Writer<B>>,

    /// Mirror of the wrapped backend's sequence
    sequence: u64,

    in_flight: usize,

    /// Snapshot buffers returned by completed writes
    spare: Vec<Vec<Real>>,

    /// First failure not yet reported to the caller
    failure: Option<String>,
}

impl<B: CheckpointBackend + 'static> AsyncBackend<B> {
    /// Wrap `inner`, which must not have been opened yet
    pub fn new(inner: B) -> Self {
        Self {
            kind: inner.kind(),
            sequence: inner.next_sequence(),
            inner: Some(inner),
            writer: None,
            in_flight: 0,
            spare: Vec::new(),
            failure: None,
        }
    }

    /// Start the writer task on first use
    fn writer(&mut self) -> Result<&mut Writer<B>> {
        if self.writer.is_none() {
            let inner = self.inner.take().ok_or_else(|| Error::Internal {
                message: "async checkpoint backend used after close".to_string(),
            })?;

            let (tx, rx) = mpsc::channel(MAX_IN_FLIGHT);
            let (event_tx, events) = mpsc::channel(MAX_IN_FLIGHT + 1);
            let task = tokio::spawn(Self::writer_loop(inner, rx, event_tx));
            self.writer = Some(Writer { tx, events, task });
        }

        self.writer.as_mut().ok_or_else(|| Error::Internal {
            message: "checkpoint writer task missing".to_string(),
        })
    }

    /// Main writer loop, returns the backend once the request channel closes
    async fn writer_loop(
        mut inner: B,
        mut rx: mpsc::Receiver<WriteRequest>,
        event_tx: mpsc::Sender<WriterEvent>,
    ) -> B {
        info!(backend = %inner.kind(), "Checkpoint writer started");

        while let Some(request) = rx.recv().await {
            let result = match inner.write(&request.data, request.tag).await {
                Ok(bytes) => inner.flush().await.map(|_| bytes),
                Err(e) => Err(e),
            };

            let event = match result {
                Ok(bytes) => {
                    debug!(bytes, "Checkpoint written");
                    WriterEvent::Completed {
                        bytes,
                        buffer: request.data,
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to write checkpoint");
                    WriterEvent::Failed {
                        error: e.to_string(),
                    }
                }
            };

            if event_tx.send(event).await.is_err() {
                break;
            }
        }

        info!("Checkpoint writer stopped");
        inner
    }

    /// Wait for the next writer event
    async fn complete_one(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| Error::Internal {
            message: "checkpoint writer task missing".to_string(),
        })?;

        let event = writer.events.recv().await.ok_or_else(|| Error::ChannelClosed {
            channel: "checkpoint writer events".to_string(),
        })?;
        self.in_flight -= 1;

        match event {
            WriterEvent::Completed { buffer, .. } => self.spare.push(buffer),
            WriterEvent::Failed { error } => {
                self.failure.get_or_insert(error);
            }
        }
        Ok(())
    }

    fn take_failure(&mut self) -> Result<()> {
        match self.failure.take() {
            Some(message) => Err(Error::Storage { message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<B: CheckpointBackend + 'static> CheckpointBackend for AsyncBackend<B> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>> {
        let inner = self.inner.as_mut().ok_or_else(|| Error::Internal {
            message: "async checkpoint backend opened twice".to_string(),
        })?;

        let recovered = inner.open(layout, buffer).await?;
        self.sequence = inner.next_sequence();
        Ok(recovered)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence
    }

    fn resume_at(&mut self, sequence: u64) {
        match self.inner.as_mut() {
            Some(inner) => {
                inner.resume_at(sequence);
                self.sequence = sequence;
            }
            None => warn!(sequence, "Cannot move sequence while writes are running"),
        }
    }

    #[instrument(skip(self, data, tag), fields(backend = "async", units = data.len()))]
    async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> Result<u64> {
        while self.in_flight >= MAX_IN_FLIGHT {
            self.complete_one().await?;
        }
        self.take_failure()?;

        let mut snapshot = self.spare.pop().unwrap_or_default();
        snapshot.clear();
        snapshot.extend_from_slice(data);

        self.writer()?
            .tx
            .send(WriteRequest {
                data: snapshot,
                tag,
            })
            .await
            .map_err(|_| Error::ChannelClosed {
                channel: "checkpoint writer requests".to_string(),
            })?;

        self.in_flight += 1;
        self.sequence += 1;
        Ok(format::data_bytes(data.len() as u64))
    }

    async fn flush(&mut self) -> Result<()> {
        while self.in_flight > 0 {
            self.complete_one().await?;
        }
        self.take_failure()
    }

    async fn close(&mut self) -> Result<()> {
        let flushed = self.flush().await;

        if let Some(writer) = self.writer.take() {
            drop(writer.tx);
            let inner = writer.task.await.map_err(|e| Error::Internal {
                message: format!("Checkpoint writer task failed: {}", e),
            })?;
            self.inner = Some(inner);
        }

        if let Some(inner) = self.inner.as_mut() {
            inner.close().await?;
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollectiveBackend;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> AsyncBackend<CollectiveBackend> {
        let prefix = dir.path().join("ckp");
        AsyncBackend::new(CollectiveBackend::with_kind(prefix, BackendKind::MpioAsync))
    }

    #[tokio::test]
    async fn test_write_completes_on_flush() {
        let dir = TempDir::new().unwrap();
        let mut backend = backend(&dir);
        assert_eq!(backend.kind(), BackendKind::MpioAsync);

        let mut buffer = vec![3.0; 32];
        backend.open(&Layout::single(32), &mut buffer).await.unwrap();
        assert_eq!(backend.write(&buffer, CheckpointTag::default()).await.unwrap(), 256);
        assert_eq!(backend.next_sequence(), 1);

        backend.flush().await.unwrap();
        assert_eq!(backend.in_flight, 0);
        assert_eq!(backend.spare.len(), 1);

        let len = std::fs::metadata(dir.path().join("ckp.0.ckpt")).unwrap().len();
        assert_eq!(len, format::HEADER_LEN as u64 + 256);
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_isolated_from_caller() {
        let dir = TempDir::new().unwrap();
        let mut backend = backend(&dir);

        let mut buffer = vec![1.0; 8];
        backend.open(&Layout::single(8), &mut buffer).await.unwrap();
        backend.write(&buffer, CheckpointTag::default()).await.unwrap();
        buffer.iter_mut().for_each(|v| *v = 9.0);
        backend.close().await.unwrap();

        let mut reopened = self::backend(&dir);
        let mut restored = vec![0.0; 8];
        reopened.open(&Layout::single(8), &mut restored).await.unwrap();
        assert_eq!(restored, vec![1.0; 8]);
    }

    #[tokio::test]
    async fn test_sequence_survives_close() {
        let dir = TempDir::new().unwrap();
        let mut backend = backend(&dir);

        let mut buffer = vec![0.0; 4];
        backend.open(&Layout::single(4), &mut buffer).await.unwrap();
        for step in 0..3 {
            let tag = CheckpointTag {
                time: step as f64,
                ..Default::default()
            };
            backend.write(&buffer, tag).await.unwrap();
        }
        backend.close().await.unwrap();

        let mut reopened = self::backend(&dir);
        let state = reopened
            .open(&Layout::single(4), &mut buffer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.time, 2.0);
        assert_eq!(reopened.next_sequence(), 3);
    }

    #[tokio::test]
    async fn test_failure_reported_on_flush() {
        let dir = TempDir::new().unwrap();
        let mut backend = backend(&dir);

        // Wrapped backend was never opened
        backend.write(&[1.0], CheckpointTag::default()).await.unwrap();
        assert!(backend.flush().await.is_err());
        backend.close().await.unwrap();
    }
}
