//! Checkpoint backend trait definition
//!
//! Defines the async interface that all checkpoint backends must implement.

use async_trait::async_trait;
use bench_core::{BackendKind, Real, RecoveredState, Result};

/// Placement of one rank's buffer inside the global checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Rank owning the local buffer
    pub rank: usize,

    /// Number of ranks writing the checkpoint
    pub rank_count: usize,

    /// Data units in the local buffer
    pub local_len: usize,

    /// Data units held by all lower ranks
    pub global_offset: u64,

    /// Data units over all ranks
    pub global_len: u64,

    /// Largest local buffer of any rank
    pub max_local_len: u64,
}

impl Layout {
    /// Layout of a run with a single rank
    pub fn single(local_len: usize) -> Self {
        Self {
            rank: 0,
            rank_count: 1,
            local_len,
            global_offset: 0,
            global_len: local_len as u64,
            max_local_len: local_len as u64,
        }
    }

    /// Whether this rank writes shared headers
    pub fn is_root(&self) -> bool {
        self.rank == bench_core::ROOT_RANK
    }
}

/// Simulation state a checkpoint is tagged with
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckpointTag {
    /// Simulation time
    pub time: f64,

    /// Wave field time step
    pub wave_field_step: u64,

    /// Fault time step
    pub fault_step: u64,
}

/// Async trait for checkpoint backends
///
/// A backend is opened once, written any number of times and closed once.
/// All methods except the sequence accessors are collective: every rank
/// calls them in the same order.
#[async_trait]
pub trait CheckpointBackend: Send {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Open the checkpoint files for the given layout
    ///
    /// If a complete checkpoint of a previous run matches the layout, its
    /// data is loaded into `buffer`.
    ///
    /// # Arguments
    /// * `layout` - Placement of the local buffer in the global checkpoint
    /// * `buffer` - Local buffer, `layout.local_len` data units long
    ///
    /// # Returns
    /// The metadata of the recovered checkpoint, if any
    ///
    /// # Errors
    /// Returns error if the checkpoint files cannot be created
    async fn open(&mut self, layout: &Layout, buffer: &mut [Real])
        -> Result<Option<RecoveredState>>;

    /// Sequence number the next write will carry
    fn next_sequence(&self) -> u64;

    /// Continue writing at `sequence`
    ///
    /// Used after `open` so that every rank writes the same slot even if
    /// their recovered checkpoints disagree.
    fn resume_at(&mut self, sequence: u64);

    /// Write the local buffer as the next checkpoint
    ///
    /// # Arguments
    /// * `data` - Local buffer contents
    /// * `tag` - Simulation state stored alongside the data
    ///
    /// # Returns
    /// Number of data bytes written by this rank
    ///
    /// # Errors
    /// Returns error if the write fails
    async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> Result<u64>;

    /// Wait until every write issued so far is complete
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush and release all files
    async fn close(&mut self) -> Result<()>;
}
