//! Shared-file checkpoint backend
//!
//! All ranks write one slot file, `<prefix>.<slot>.ckpt`. The root rank owns
//! the header at offset 0; every rank writes its data at
//! `HEADER_LEN + global_offset * DATA_UNIT_SIZE`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bench_core::{BackendKind, Real, RecoveredState, Result};
use bytes::BytesMut;
use tracing::{debug, instrument};

use crate::file::{self, SlotFile};
use crate::format::{self, CheckpointHeader, HEADER_LEN, SLOT_COUNT};
use crate::{CheckpointBackend, CheckpointTag, Layout};

const EXTENSION: &str = "ckpt";

/// Collective shared-file checkpoint backend
#[derive(Debug)]
pub struct CollectiveBackend {
    /// Filename prefix of both slot files
    prefix: PathBuf,

    /// Reported backend kind, also stored in headers
    kind: BackendKind,

    /// Slot files, present between open and close
    slots: Option<[SlotFile; SLOT_COUNT]>,

    /// Layout registered at open
    layout: Option<Layout>,

    /// Sequence number of the next write
    sequence: u64,

    /// Encoding buffer reused across writes
    scratch: BytesMut,
}

impl CollectiveBackend {
    /// Create a backend writing `<prefix>.<slot>.ckpt`
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self::with_kind(prefix, BackendKind::Mpio)
    }

    /// Create a backend that reports itself as `kind`
    pub fn with_kind<P: AsRef<Path>>(prefix: P, kind: BackendKind) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            kind,
            slots: None,
            layout: None,
            sequence: 0,
            scratch: BytesMut::new(),
        }
    }

    fn data_offset(layout: &Layout) -> u64 {
        HEADER_LEN as u64 + format::data_bytes(layout.global_offset)
    }
}

#[async_trait]
impl CheckpointBackend for CollectiveBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    #[instrument(skip(self, buffer), fields(backend = "collective", rank = layout.rank))]
    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>> {
        let mut slots = file::open_slots(&self.prefix, None, EXTENSION).await?;

        let mut candidates = [None; SLOT_COUNT];
        for (slot, slot_file) in slots.iter_mut().enumerate() {
            candidates[slot] = slot_file
                .read_header(0)
                .await?
                .filter(|h| h.data_units == layout.global_len);
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

        // Peers only read the header and their own region
        if layout.is_root() {
            let len = HEADER_LEN as u64 + format::data_bytes(layout.global_len);
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
            let header = CheckpointHeader::new(self.sequence, tag, layout.global_len, self.kind);
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
