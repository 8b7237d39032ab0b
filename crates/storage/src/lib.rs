//! Storage - Checkpoint backends for the I/O benchmark
//!
//! Every backend writes double-buffered checkpoints: two slot files are
//! written alternately, so a crash during a write always leaves the previous
//! checkpoint intact. Available layouts:
//! - `posix` - one file per rank
//! - `hdf5` - shared self-describing file
//! - `mpio` - shared raw file, written collectively
//! - `mpio-async` - `mpio` with writes overlapped with computation
//! - `sionlib` - shared container with one aligned chunk per rank
//!
//! # Example
//!
//! ```no_run
//! use bench_core::BackendKind;
//! use storage::{create_backend, CheckpointTag, Layout};
//!
//! # async fn example() -> bench_core::Result<()> {
//! let mut backend = create_backend(BackendKind::Posix, "/tmp/checkpoint");
//! let mut dofs = vec![0.0; 1024];
//! backend.open(&Layout::single(dofs.len()), &mut dofs).await?;
//! backend.write(&dofs, CheckpointTag::default()).await?;
//! backend.close().await?;
//! # Ok(())
//! # }
//! ```

mod async_writer;
mod backend;
mod collective;
mod container;
mod file;
pub mod format;
mod posix;
mod structured;

use std::path::Path;

use bench_core::BackendKind;

pub use async_writer::{AsyncBackend, WriteRequest, WriterEvent};
pub use backend::{CheckpointBackend, CheckpointTag, Layout};
pub use collective::CollectiveBackend;
pub use container::ContainerBackend;
pub use posix::PosixBackend;
pub use structured::{DatasetDescriptor, StructuredBackend};

/// Create the backend of the given kind writing below `prefix`
pub fn create_backend<P: AsRef<Path>>(kind: BackendKind, prefix: P) -> Box<dyn CheckpointBackend> {
    let prefix = prefix.as_ref();
    match kind {
        BackendKind::Posix => Box::new(PosixBackend::new(prefix)),
        BackendKind::Hdf5 => Box::new(StructuredBackend::new(prefix)),
        BackendKind::Mpio => Box::new(CollectiveBackend::new(prefix)),
        BackendKind::MpioAsync => Box::new(AsyncBackend::new(CollectiveBackend::with_kind(
            prefix,
            BackendKind::MpioAsync,
        ))),
        BackendKind::Sionlib => Box::new(ContainerBackend::new(prefix)),
    }
}
