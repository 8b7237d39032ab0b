//! File-per-rank checkpoint backend
//!
//! Every rank writes its own pair of slot files, `<prefix>.<slot>.<rank>.ckpt`,
//! each holding one header followed by the rank's data.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bench_core::{BackendKind, Real, RecoveredState, Result};
use bytes::BytesMut;
use tracing::{debug, instrument};

use crate::file::{self, SlotFile};
use crate::format::{self, CheckpointHeader, HEADER_LEN, SLOT_COUNT};
use crate::{CheckpointBackend, CheckpointTag, Layout};

const EXTENSION: &str = "ckpt";

/// Local file checkpoint backend
#[derive(Debug)]
pub struct PosixBackend {
    /// Filename prefix of all slot files
    prefix: PathBuf,

    /// Slot files, present between open and close
    slots: Option<[SlotFile; SLOT_COUNT]>,

    /// Sequence number of the next write
    sequence: u64,

    /// Encoding buffer reused across writes
    scratch: BytesMut,
}

impl PosixBackend {
    /// Create a backend writing below `prefix`
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            slots: None,
            sequence: 0,
            scratch: BytesMut::new(),
        }
    }
}

#[async_trait]
impl CheckpointBackend for PosixBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Posix
    }

    #[instrument(skip(self, buffer), fields(backend = "posix", rank = layout.rank))]
    async fn open(
        &mut self,
        layout: &Layout,
        buffer: &mut [Real],
    ) -> Result<Option<RecoveredState>> {
        let mut slots = file::open_slots(&self.prefix, Some(layout.rank), EXTENSION).await?;

        let mut candidates = [None; SLOT_COUNT];
        for (slot, slot_file) in slots.iter_mut().enumerate() {
            candidates[slot] = slot_file
                .read_header(0)
                .await?
                .filter(|h| h.data_units == layout.local_len as u64);
        }

        let mut recovered = None;
        if let Some((slot, header)) = format::latest(candidates) {
            let mut bytes = vec![0u8; format::data_bytes(header.data_units) as usize];
            if slots[slot].read_at(HEADER_LEN as u64, &mut bytes).await? {
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

        self.scratch = BytesMut::with_capacity(
            HEADER_LEN + format::data_bytes(layout.local_len as u64) as usize,
        );
        self.slots = Some(slots);
        Ok(recovered)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence
    }

    fn resume_at(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    async fn write(&mut self, data: &[Real], tag: CheckpointTag) -> Result<u64> {
        let slots = self.slots.as_mut().ok_or_else(file::not_open)?;
        let slot = &mut slots[format::slot_of(self.sequence)];

        self.scratch.clear();
        CheckpointHeader::new(self.sequence, tag, data.len() as u64, BackendKind::Posix)
            .encode_into(&mut self.scratch);
        format::encode_dofs(data, &mut self.scratch);

        slot.write_at(0, &self.scratch).await?;
        slot.sync().await?;

        self.sequence += 1;
        Ok(format::data_bytes(data.len() as u64))
    }

    async fn close(&mut self) -> Result<()> {
        file::close_slots(self.slots.take()).await
    }
}
