//! Self-describing shared-file checkpoint backend
//!
//! Slot files are named `<prefix>.<slot>.h5ckpt` and laid out as
//!
//! ```text
//! 0           header (root)
//! 64          u32 length + JSON dataset descriptor (root)
//! 4096        data of all ranks, ordered by rank
//! ```
//!
//! The descriptor makes the file readable without knowing the run's layout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bench_core::{BackendKind, Error, Real, RecoveredState, Result};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::file::{self, SlotFile};
use crate::format::{self, CheckpointHeader, BLOCK_SIZE, HEADER_LEN, SLOT_COUNT};
use crate::{CheckpointBackend, CheckpointTag, Layout};

const EXTENSION: &str = "h5ckpt";

/// Name of the single dataset in every file
pub const DATASET_NAME: &str = "dofs";

/// Element type of the dataset
pub const DATASET_DTYPE: &str = "f64-le";

/// Offset of the first data unit
pub const DATA_OFFSET: u64 = BLOCK_SIZE;

const DESCRIPTOR_OFFSET: u64 = HEADER_LEN as u64;
const DESCRIPTOR_CAPACITY: usize = (DATA_OFFSET - DESCRIPTOR_OFFSET) as usize - 4;

/// JSON description of the dataset stored in a slot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Dataset name
    pub dataset: String,

    /// Element type
    pub dtype: String,

    /// Dataset dimensions
    pub shape: Vec<u64>,

    /// Number of ranks that wrote the dataset
    pub ranks: usize,

    /// When the root rank last wrote the file
    pub written_at: DateTime<Utc>,
}

impl DatasetDescriptor {
    fn for_layout(layout: &Layout) -> Self {
        Self {
            dataset: DATASET_NAME.to_string(),
            dtype: DATASET_DTYPE.to_string(),
            shape: vec![layout.global_len],
            ranks: layout.rank_count,
            written_at: Utc::now(),
        }
    }

    fn matches(&self, layout: &Layout) -> bool {
        self.dataset == DATASET_NAME
            && self.dtype == DATASET_DTYPE
            && self.shape == [layout.global_len]
    }

    /// Encode as a length-prefixed JSON record
    fn encode(&self) -> Result<BytesMut> {
        let json = serde_json::to_vec(self)?;
        if json.len() > DESCRIPTOR_CAPACITY {
            return Err(Error::storage(format!(
                "Dataset descriptor of {} bytes exceeds {} bytes",
                json.len(),
                DESCRIPTOR_CAPACITY
            )));
        }

        let mut buf = BytesMut::with_capacity(4 + json.len());
        buf.put_u32_le(json.len() as u32);
        buf.put_slice(&json);
        Ok(buf)
    }
}

/// Parallel self-describing file backend
#[derive(Debug)]
pub struct StructuredBackend {
    /// Filename prefix of both slot files
    prefix: PathBuf,

    /// Slot files, present between open and close
    slots: Option<[SlotFile; SLOT_COUNT]>,

    /// Layout registered at open
    layout: Option<Layout>,

    /// Sequence number of the next write
    sequence: u64,

    /// Encoding buffer reused across writes
    scratch: BytesMut,
}

impl StructuredBackend {
    /// Create a backend writing `<prefix>.<slot>.h5ckpt`
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            slots: None,
            layout: None,
            sequence: 0,
            scratch: BytesMut::new(),
        }
    }

    fn data_offset(layout: &Layout) -> u64 {
        DATA_OFFSET + format::data_bytes(layout.global_offset)
    }

    /// Read the descriptor of a slot file
    async fn read_descriptor(slot: &mut SlotFile) -> Result<Option<DatasetDescriptor>> {
        let mut len = [0u8; 4];
        if !slot.read_at(DESCRIPTOR_OFFSET, &mut len).await? {
            return Ok(None);
        }

        let len = u32::from_le_bytes(len) as usize;
        if len > DESCRIPTOR_CAPACITY {
            return Ok(None);
        }

        let mut json = vec![0u8; len];
        if !slot.read_at(DESCRIPTOR_OFFSET + 4, &mut json).await? {
            return Ok(None);
        }

        match serde_json::from_slice(&json) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                debug!(path = ?slot.path(), error = %e, "Ignoring unreadable dataset descriptor");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CheckpointBackend for StructuredBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hdf5
    }

    #[instrument(skip(self, buffer), fields(backend = "hdf5", rank = layout.rank))]
    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>> {
        let mut slots = file::open_slots(&self.prefix, None, EXTENSION).await?;

        let mut candidates = [None; SLOT_COUNT];
        for (slot, slot_file) in slots.iter_mut().enumerate() {
            let header = slot_file
                .read_header(0)
                .await?
                .filter(|h| h.data_units == layout.global_len);
            if header.is_none() {
                continue;
            }

            let described = Self::read_descriptor(slot_file)
                .await?
                .is_some_and(|d| d.matches(layout));
            if described {
                candidates[slot] = header;
            }
        }

        let mut recovered = None;
        if let Some((slot, header)) = format::latest(candidates) {
            let mut bytes = vec![0u8; format::data_bytes(layout.local_len as u64) as usize];
            if slots[slot].read_at(Self::data_offset(layout), &mut bytes).await? {
                format::decode_dofs(&bytes, buffer);
                self.sequence = header.sequence + 1;
                recovered = Some(header.recovered());
                debug!(
                    path = ?slots[slot].path(),
                    sequence = header.sequence,
                    "Recovered checkpoint"
                );
            }
        }

        if layout.is_root() {
            let len = DATA_OFFSET + format::data_bytes(layout.global_len);
            for slot in &slots {
                slot.ensure_len(len).await?;
            }
        }

        self.scratch =
            BytesMut::with_capacity(format::data_bytes(layout.local_len as u64) as usize);
        self.slots = Some(slots);
        self.layout = Some(*layout);
        Ok(recovered)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence
    }

    fn resume_at(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> Result<u64> {
        let layout = self.layout.ok_or_else(file::not_open)?;
        let slots = self.slots.as_mut().ok_or_else(file::not_open)?;
        let slot = &mut slots[format::slot_of(self.sequence)];

        self.scratch.clear();
        format::encode_dofs(data, &mut self.scratch);
        slot.write_at(Self::data_offset(&layout), &self.scratch).await?;

        if layout.is_root() {
            let descriptor = DatasetDescriptor::for_layout(&layout).encode()?;
            slot.write_at(DESCRIPTOR_OFFSET, &descriptor).await?;

            let header =
                CheckpointHeader::new(self.sequence, tag, layout.global_len, BackendKind::Hdf5);
            slot.write_at(0, &header.encode()).await?;
        }
        slot.sync().await?;

        self.sequence += 1;
        Ok(format::data_bytes(data.len() as u64))
    }

    async fn close(&mut self) -> Result<()> {
        self.layout = None;
        file::close_slots(self.slots.take()).await
    }
}
