//! Positional file access shared by the backends

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bench_core::{Error, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::format::{self, CheckpointHeader, HEADER_LEN, SLOT_COUNT};

/// One open checkpoint slot file
#[derive(Debug)]
pub(crate) struct SlotFile {
    path: PathBuf,
    file: File,
}

impl SlotFile {
    /// Open `path` for reading and writing, creating it and its parent
    /// directory if needed. Existing contents are kept for recovery.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage {
                    message: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to open {:?}: {}", path, e),
            })?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub async fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    /// Resize the file, keeping existing contents up to `len`
    pub async fn ensure_len(&self, len: u64) -> Result<()> {
        if self.len().await? != len {
            self.file.set_len(len).await.map_err(|e| Error::Storage {
                message: format!("Failed to resize {:?} to {} bytes: {}", self.path, len, e),
            })?;
        }
        Ok(())
    }

    /// Write `bytes` at `offset`
    pub async fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file
            .write_all(bytes)
            .await
            .map_err(|e| Error::Storage {
                message: format!(
                    "Failed to write {} bytes at offset {} of {:?}: {}",
                    bytes.len(),
                    offset,
                    self.path,
                    e
                ),
            })?;
        Ok(())
    }

    /// Fill `buf` from `offset`
    ///
    /// # Returns
    /// `false` if the file ends before `offset + buf.len()`
    pub async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        if offset + buf.len() as u64 > self.len().await? {
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(buf).await?;
        Ok(true)
    }

    /// Read and validate the record header at `offset`
    pub async fn read_header(&mut self, offset: u64) -> Result<Option<CheckpointHeader>> {
        let mut buf = [0u8; HEADER_LEN];
        if !self.read_at(offset, &mut buf).await? {
            return Ok(None);
        }

        match CheckpointHeader::decode(&buf) {
            Ok(header) => Ok(Some(header)),
            Err(reason) => {
                debug!(path = ?self.path, offset, %reason, "Ignoring checkpoint record");
                Ok(None)
            }
        }
    }

    /// Push written data to the device
    pub async fn sync(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync {:?}: {}", self.path, e),
        })?;
        Ok(())
    }
}

/// Open both slot files of a backend
pub(crate) async fn open_slots(
    prefix: &Path,
    rank: Option<usize>,
    extension: &str,
) -> Result<[SlotFile; SLOT_COUNT]> {
    let first = SlotFile::open(format::slot_path(prefix, 0, rank, extension)).await?;
    let second = SlotFile::open(format::slot_path(prefix, 1, rank, extension)).await?;
    Ok([first, second])
}

/// Sync and drop both slot files
pub(crate) async fn close_slots(slots: Option<[SlotFile; SLOT_COUNT]>) -> Result<()> {
    if let Some(slots) = slots {
        for mut slot in slots {
            slot.sync().await?;
            debug!(path = ?slot.path(), "Closed checkpoint file");
        }
    }
    Ok(())
}

/// Error for a backend used before `open`
pub(crate) fn not_open() -> Error {
    Error::Internal {
        message: "checkpoint backend used before open".to_string(),
    }
}
