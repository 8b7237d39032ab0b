//! Benchmark configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

/// Default number of timed iterations
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Default data units per element: 56 aligned basis functions times 9 quantities
pub const DEFAULT_ALIGNED_DOFS: u64 = 504;

/// Checkpoint backend selector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum BackendKind {
    /// One file per rank
    #[default]
    Posix,

    /// Shared self-describing file with a dataset descriptor
    Hdf5,

    /// Shared file, every rank writes its slice at a global offset
    Mpio,

    /// Shared file written by a background writer task
    MpioAsync,

    /// Container file with one block-aligned chunk per rank
    Sionlib,
}

impl BackendKind {
    /// All backends, in command line order
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Posix,
        BackendKind::Hdf5,
        BackendKind::Mpio,
        BackendKind::MpioAsync,
        BackendKind::Sionlib,
    ];

    /// Command line name of the backend
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Posix => "posix",
            BackendKind::Hdf5 => "hdf5",
            BackendKind::Mpio => "mpio",
            BackendKind::MpioAsync => "mpio-async",
            BackendKind::Sionlib => "sionlib",
        }
    }

    /// Tag stored in checkpoint headers
    pub fn tag(&self) -> u8 {
        match self {
            BackendKind::Posix => 1,
            BackendKind::Hdf5 => 2,
            BackendKind::Mpio => 3,
            BackendKind::MpioAsync => 4,
            BackendKind::Sionlib => 5,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::config(format!("Unknown back-end: {}", s)))
    }
}

/// Complete configuration of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Checkpoint backend
    pub backend: BackendKind,

    /// Checkpoint filename prefix
    pub file_prefix: PathBuf,

    /// Number of elements per rank (0 or absent means unset)
    pub elements_per_rank: Option<u64>,

    /// Total number of elements over all ranks (0 or absent means unset)
    pub total_elements: Option<u64>,

    /// Number of timed iterations
    pub iterations: u32,

    /// Data units per logical element
    pub aligned_dofs: u64,

    /// Where the root rank writes the JSON report
    pub report_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            file_prefix: PathBuf::from("checkpoint"),
            elements_per_rank: None,
            total_elements: None,
            iterations: DEFAULT_ITERATIONS,
            aligned_dofs: DEFAULT_ALIGNED_DOFS,
            report_path: None,
        }
    }
}

impl BenchConfig {
    /// Per-rank element count, with 0 treated as unset
    pub fn elements(&self) -> Option<u64> {
        self.elements_per_rank.filter(|&n| n > 0)
    }

    /// Global element count, with 0 treated as unset
    pub fn total(&self) -> Option<u64> {
        self.total_elements.filter(|&n| n > 0)
    }

    /// Check the settings that do not depend on the process topology
    pub fn validate(&self) -> Result<()> {
        if self.file_prefix.as_os_str().is_empty() {
            return Err(Error::config("File name prefix must not be empty"));
        }
        if self.iterations == 0 {
            return Err(Error::config("Number of iterations must be at least 1"));
        }
        if self.aligned_dofs == 0 {
            return Err(Error::config("Data units per element must be at least 1"));
        }
        if self.elements().is_none() && self.total().is_none() {
            return Err(Error::config(
                "Elements per rank or total number of elements required",
            ));
        }
        Ok(())
    }
}
