//! Core type definitions for the checkpoint benchmark

use serde::{Deserialize, Serialize};

/// Scalar type of one degree of freedom
pub type Real = f64;

/// Size of one data unit in bytes
pub const DATA_UNIT_SIZE: usize = std::mem::size_of::<Real>();

/// Bytes per MiB, the unit bandwidth is reported in
pub const MIB: f64 = 1024.0 * 1024.0;

/// Rank that receives reductions and reports results
pub const ROOT_RANK: usize = 0;

/// Metadata a backend recovered from a previous run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveredState {
    /// Simulation time of the recovered checkpoint
    pub time: f64,

    /// Wave field time step of the recovered checkpoint
    pub wave_field_step: u64,

    /// Fault time step of the recovered checkpoint
    pub fault_step: u64,

    /// Write sequence number of the recovered checkpoint
    pub sequence: u64,
}

/// Measurement of a single timed write
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationMetric {
    /// Iteration index
    pub iteration: u32,

    /// Wall time between the two barriers surrounding the write
    pub elapsed_secs: f64,

    /// Aggregate bandwidth over all ranks, if this rank knows the global size
    pub bandwidth_mib_s: Option<f64>,
}

/// Statistics over all iterations of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of iterations measured
    pub iterations: u32,

    /// Sum of all iteration times
    pub total_secs: f64,

    /// Mean iteration time
    pub mean_secs: f64,

    /// Mean aggregate bandwidth, if this rank knows the global size
    pub mean_bandwidth_mib_s: Option<f64>,
}
