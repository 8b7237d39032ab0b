//! Wall clock measurement and bandwidth arithmetic

use std::time::Instant;

use bench_core::MIB;

/// Monotonic stopwatch around one timed write
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since `start`
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Bandwidth in MiB/s of moving `bytes` in `secs`
///
/// `None` if no time elapsed.
pub fn bandwidth_mib_s(bytes: u64, secs: f64) -> Option<f64> {
    (secs > 0.0).then(|| bytes as f64 / secs / MIB)
}
