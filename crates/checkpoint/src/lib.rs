//! Checkpoint session management for the I/O benchmark
//!
//! Wraps a storage backend in a state machine that enforces the
//! configure, init, write, close call order on every rank.

pub mod session;

pub use session::{CheckpointSession, SessionState};
