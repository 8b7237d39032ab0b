//! On-disk checkpoint format
//!
//! Every checkpoint record starts with a fixed 64-byte little-endian header
//! followed by the data units as little-endian `f64`. Backends alternate
//! between two slot files so that a complete checkpoint survives an
//! interrupted write.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bench_core::{BackendKind, Real, RecoveredState, DATA_UNIT_SIZE};
use bytes::{Buf, BufMut, BytesMut};

use crate::CheckpointTag;

/// Magic bytes for checkpoint records
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Magic bytes for container preambles
pub const CONTAINER_MAGIC: [u8; 4] = *b"CKPC";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Encoded size of a [`CheckpointHeader`]
pub const HEADER_LEN: usize = 64;

/// Alignment of reserved regions and container chunks
pub const BLOCK_SIZE: u64 = 4096;

/// Number of alternating checkpoint files
pub const SLOT_COUNT: usize = 2;

/// Header of one checkpoint record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointHeader {
    /// Write sequence number, selects the slot
    pub sequence: u64,

    /// Simulation state
    pub tag: CheckpointTag,

    /// Data units in the record
    pub data_units: u64,

    /// Backend that wrote the record
    pub backend: u8,
}

impl CheckpointHeader {
    /// Create a header for a record written by `kind`
    pub fn new(sequence: u64, tag: CheckpointTag, data_units: u64, kind: BackendKind) -> Self {
        Self {
            sequence,
            tag,
            data_units,
            backend: kind.tag(),
        }
    }

    /// Append the encoded header to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_slice(&CHECKPOINT_MAGIC);
        buf.put_u32_le(CHECKPOINT_VERSION);
        buf.put_u64_le(self.sequence);
        buf.put_f64_le(self.tag.time);
        buf.put_u64_le(self.tag.wave_field_step);
        buf.put_u64_le(self.tag.fault_step);
        buf.put_u64_le(self.data_units);
        buf.put_u8(self.backend);
        buf.put_bytes(0, HEADER_LEN - (buf.len() - start));
    }

    /// Encode the header into a fresh buffer
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a header, returning the reason if it is not valid
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("header truncated to {} bytes", bytes.len()));
        }

        let mut buf = &bytes[..HEADER_LEN];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != CHECKPOINT_MAGIC {
            return Err("invalid checkpoint magic".to_string());
        }

        let version = buf.get_u32_le();
        if version != CHECKPOINT_VERSION {
            return Err(format!(
                "unsupported version {} (expected {})",
                version, CHECKPOINT_VERSION
            ));
        }

        let sequence = buf.get_u64_le();
        let time = buf.get_f64_le();
        let wave_field_step = buf.get_u64_le();
        let fault_step = buf.get_u64_le();
        let data_units = buf.get_u64_le();
        let backend = buf.get_u8();

        Ok(Self {
            sequence,
            tag: CheckpointTag {
                time,
                wave_field_step,
                fault_step,
            },
            data_units,
            backend,
        })
    }

    /// Metadata reported to the session after recovery
    pub fn recovered(&self) -> RecoveredState {
        RecoveredState {
            time: self.tag.time,
            wave_field_step: self.tag.wave_field_step,
            fault_step: self.tag.fault_step,
            sequence: self.sequence,
        }
    }
}

/// Slot a write with the given sequence number goes to
pub fn slot_of(sequence: u64) -> usize {
    (sequence % SLOT_COUNT as u64) as usize
}

/// Path of a slot file: `<prefix>.<slot>[.<rank>].<extension>`
pub fn slot_path(prefix: &Path, slot: usize, rank: Option<usize>, extension: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(format!(".{}", slot));
    if let Some(rank) = rank {
        name.push(format!(".{}", rank));
    }
    name.push(format!(".{}", extension));
    PathBuf::from(name)
}

/// Round `n` up to a multiple of `block`
pub fn align_up(n: u64, block: u64) -> u64 {
    n.div_ceil(block) * block
}

/// Size in bytes of `units` data units
pub fn data_bytes(units: u64) -> u64 {
    units * DATA_UNIT_SIZE as u64
}

/// Append the little-endian encoding of `data` to `buf`
pub fn encode_dofs(data: &[Real], buf: &mut BytesMut) {
    buf.reserve(data.len() * DATA_UNIT_SIZE);
    for &value in data {
        buf.put_f64_le(value);
    }
}

/// Decode little-endian data units from `bytes` into `out`
///
/// `bytes` must hold exactly `out.len()` data units.
pub fn decode_dofs(mut bytes: &[u8], out: &mut [Real]) {
    debug_assert_eq!(bytes.len(), out.len() * DATA_UNIT_SIZE);
    for value in out.iter_mut() {
        *value = bytes.get_f64_le();
    }
}

/// Pick the candidate with the highest sequence number
pub fn latest(
    candidates: [Option<CheckpointHeader>; SLOT_COUNT],
) -> Option<(usize, CheckpointHeader)> {
    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(slot, header)| header.map(|h| (slot, h)))
        .max_by_key(|(_, header)| header.sequence)
}
