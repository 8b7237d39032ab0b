//! Bench Core - Foundation for the checkpoint write benchmark
//!
//! Provides the error type, run configuration and the measurement types
//! shared by the topology, storage, checkpoint and harness crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendKind, BenchConfig};
pub use error::{Error, Result};
pub use types::*;
