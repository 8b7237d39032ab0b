//! Checkpoint session lifecycle
//!
//! A session owns one checkpoint backend and drives it through
//! configure, init, any number of writes and close, rejecting calls made
//! out of order.

use std::fmt;
use std::path::Path;

use bench_core::{BackendKind, Error, Real, RecoveredState, Result};
use storage::{create_backend, CheckpointBackend, CheckpointTag, Layout};
use topology::{agree, ProcessTopology};
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of a [`CheckpointSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend may be configured, nothing opened yet
    Uninitialized,

    /// Backend open, writes accepted
    Initialized,

    /// Backend released, every call fails
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Checkpoint stream of one rank
pub struct CheckpointSession {
    state: SessionState,

    /// Configured backend
    backend: Option<Box<dyn CheckpointBackend>>,

    /// Layout registered by `init`
    layout: Option<Layout>,
}

impl Default for CheckpointSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointSession {
    /// Create an unconfigured session
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            backend: None,
            layout: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Kind of the configured backend
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Select the backend and filename prefix
    ///
    /// May be repeated before `init`; the last call wins.
    pub fn configure<P: AsRef<Path>>(&mut self, kind: BackendKind, prefix: P) -> Result<()> {
        self.configure_backend(create_backend(kind, prefix))
    }

    /// Install a caller-provided backend
    pub fn configure_backend(&mut self, backend: Box<dyn CheckpointBackend>) -> Result<()> {
        self.expect_state(SessionState::Uninitialized, "configure")?;
        debug!(backend = %backend.kind(), "Configured checkpoint backend");
        self.backend = Some(backend);
        Ok(())
    }

    /// Open the checkpoint stream for `buffer`
    ///
    /// Collective over `topology`. If every rank finds the same previous
    /// checkpoint, its data is loaded into `buffer` and its metadata returned.
    ///
    /// # Arguments
    /// * `topology` - Ranks taking part in the checkpoint
    /// * `buffer` - Local data, registered for all later writes
    ///
    /// # Returns
    /// Metadata of the recovered checkpoint, `None` on a fresh start
    #[instrument(name = "init_checkpoint", skip_all, fields(rank = topology.rank()))]
    pub async fn init<T>(
        &mut self,
        topology: &T,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>>
    where
        T: ProcessTopology + ?Sized,
    {
        self.expect_state(SessionState::Uninitialized, "initialize")?;
        let backend = self.backend.as_mut().ok_or_else(|| Error::InvalidState {
            operation: "initialize",
            state: "unconfigured".to_string(),
        })?;

        let local_len = buffer.len() as u64;
        let layout = Layout {
            rank: topology.rank(),
            rank_count: topology.size(),
            local_len: buffer.len(),
            global_offset: topology.exclusive_scan_sum(local_len).await?,
            global_len: topology.all_reduce_sum(local_len).await?,
            max_local_len: topology.all_reduce_max(local_len).await?,
        };
        debug!(?layout, "Opening checkpoint backend");

        let opened = backend.open(&layout, buffer).await;
        let mut recovered = agree(topology, opened).await?;

        // Ranks must agree on the slot of the next write
        let local_next = backend.next_sequence();
        let highest = topology.all_reduce_max(local_next).await?;
        let lowest = u64::MAX - topology.all_reduce_max(u64::MAX - local_next).await?;
        if highest != lowest {
            if topology.is_root() {
                warn!(lowest, highest, "Ranks recovered different checkpoints, starting fresh");
            }
            recovered = None;
        }
        backend.resume_at(highest);

        topology.barrier().await?;

        if let Some(state) = &recovered {
            if topology.is_root() {
                info!(
                    time = state.time,
                    sequence = state.sequence,
                    "Recovered previous checkpoint"
                );
            }
        }

        self.layout = Some(layout);
        self.state = SessionState::Initialized;
        Ok(recovered)
    }

    /// Persist `buffer` tagged with the given step counters
    ///
    /// Collective. Returns once the backend has completed the write; the
    /// returned value is the number of data bytes this rank wrote.
    #[instrument(name = "write_dofs", skip(self, buffer), fields(units = buffer.len()))]
    pub async fn write(
        &mut self,
        buffer: &[Real],
        iteration: u64,
        wave_field_step: u64,
        fault_step: u64,
    ) -> Result<u64> {
        self.expect_state(SessionState::Initialized, "write")?;
        let expected = self.layout.map(|l| l.local_len).unwrap_or_default();
        if buffer.len() != expected {
            return Err(Error::BufferMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        let backend = self.backend.as_mut().ok_or_else(|| Error::Internal {
            message: "initialized session without backend".to_string(),
        })?;

        let tag = CheckpointTag {
            time: iteration as f64,
            wave_field_step,
            fault_step,
        };
        let bytes = backend.write(buffer, tag).await?;
        backend.flush().await?;
        Ok(bytes)
    }

    /// Flush and release the backend
    #[instrument(name = "finalize_checkpoint", skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        self.expect_state(SessionState::Initialized, "close")?;
        self.state = SessionState::Closed;
        self.layout = None;

        if let Some(mut backend) = self.backend.take() {
            backend.flush().await?;
            backend.close().await?;
        }
        debug!("Checkpoint session closed");
        Ok(())
    }
}

impl Drop for CheckpointSession {
    fn drop(&mut self) {
        if self.state == SessionState::Initialized {
            warn!("Checkpoint session dropped without close");
        }
    }
}
