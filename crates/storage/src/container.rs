//! Container-file checkpoint backend
//!
//! Packs the checkpoints of all ranks into one slot file,
//! `<prefix>.<slot>.sion`, with a fixed-size chunk per rank:
//!
//! ```text
//! 0                       preamble (root): magic, version, ranks, chunk size
//! 4096 + rank * chunk     header + data of `rank`
//! ```
//!
//! Chunks are sized for the largest rank and aligned to 4 KiB, so ranks never
//! share a file system block.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bench_core::{BackendKind, Real, RecoveredState, Result};
use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, instrument};

use crate::file::{self, SlotFile};
use crate::format::{
    self, CheckpointHeader, BLOCK_SIZE, CHECKPOINT_VERSION, CONTAINER_MAGIC, HEADER_LEN,
    SLOT_COUNT,
};
use crate::{CheckpointBackend, CheckpointTag, Layout};

const EXTENSION: &str = "sion";
const PREAMBLE_LEN: usize = 24;

/// Container geometry stored at the start of a slot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Preamble {
    ranks: u64,
    chunk_size: u64,
}

impl Preamble {
    fn for_layout(layout: &Layout) -> Self {
        Self {
            ranks: layout.rank_count as u64,
            chunk_size: format::align_up(
                HEADER_LEN as u64 + format::data_bytes(layout.max_local_len),
                BLOCK_SIZE,
            ),
        }
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PREAMBLE_LEN);
        buf.put_slice(&CONTAINER_MAGIC);
        buf.put_u32_le(CHECKPOINT_VERSION);
        buf.put_u64_le(self.ranks);
        buf.put_u64_le(self.chunk_size);
        buf
    }

    fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PREAMBLE_LEN || bytes[..4] != CONTAINER_MAGIC {
            return None;
        }
        bytes.advance(4);
        if bytes.get_u32_le() != CHECKPOINT_VERSION {
            return None;
        }
        Some(Self {
            ranks: bytes.get_u64_le(),
            chunk_size: bytes.get_u64_le(),
        })
    }

    fn chunk_offset(&self, rank: usize) -> u64 {
        BLOCK_SIZE + rank as u64 * self.chunk_size
    }

    fn file_len(&self) -> u64 {
        BLOCK_SIZE + self.ranks * self.chunk_size
    }
}

/// Log-structured container backend
#[derive(Debug)]
pub struct ContainerBackend {
    /// Filename prefix of both slot files
    prefix: PathBuf,

    /// Slot files, present between open and close
    slots: Option<[SlotFile; SLOT_COUNT]>,

    /// Layout registered at open
    layout: Option<Layout>,

    /// Container geometry derived from the layout
    preamble: Option<Preamble>,

    /// Sequence number of the next write
    sequence: u64,

    /// Encoding buffer reused across writes
    scratch: BytesMut,
}

impl ContainerBackend {
    /// Create a backend writing `<prefix>.<slot>.sion`
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            slots: None,
            layout: None,
            preamble: None,
            sequence: 0,
            scratch: BytesMut::new(),
        }
    }
}

#[async_trait]
impl CheckpointBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sionlib
    }

    #[instrument(skip(self, buffer), fields(backend = "sionlib", rank = layout.rank))]
    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>> {
        let mut slots = file::open_slots(&self.prefix, None, EXTENSION).await?;
        let preamble = Preamble::for_layout(layout);
        let offset = preamble.chunk_offset(layout.rank);

        let mut candidates = [None; SLOT_COUNT];
        for (slot, slot_file) in slots.iter_mut().enumerate() {
            let mut bytes = [0u8; PREAMBLE_LEN];
            let geometry_matches = slot_file.read_at(0, &mut bytes).await?
                && Preamble::decode(&bytes) == Some(preamble);
            if !geometry_matches {
                continue;
            }

            candidates[slot] = slot_file
                .read_header(offset)
                .await?
                .filter(|h| h.data_units == layout.local_len as u64);
        }

        let mut recovered = None;
        if let Some((slot, header)) = format::latest(candidates) {
            let mut bytes = vec![0u8; format::data_bytes(header.data_units) as usize];
            if slots[slot].read_at(offset + HEADER_LEN as u64, &mut bytes).await? {
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
            for slot in &slots {
                slot.ensure_len(preamble.file_len()).await?;
            }
        }

        self.scratch = BytesMut::with_capacity(preamble.chunk_size as usize);
        self.slots = Some(slots);
        self.layout = Some(*layout);
        self.preamble = Some(preamble);
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
        let preamble = self.preamble.ok_or_else(file::not_open)?;
        let slots = self.slots.as_mut().ok_or_else(file::not_open)?;
        let slot = &mut slots[format::slot_of(self.sequence)];

        self.scratch.clear();
        CheckpointHeader::new(self.sequence, tag, data.len() as u64, BackendKind::Sionlib)
            .encode_into(&mut self.scratch);
        format::encode_dofs(data, &mut self.scratch);
        slot.write_at(preamble.chunk_offset(layout.rank), &self.scratch)
            .await?;

        if layout.is_root() {
            slot.write_at(0, &preamble.encode()).await?;
        }
        slot.sync().await?;

        self.sequence += 1;
        Ok(format::data_bytes(data.len() as u64))
    }

    async fn close(&mut self) -> Result<()> {
        self.layout = None;
        self.preamble = None;
        file::close_slots(self.slots.take()).await
    }
}
