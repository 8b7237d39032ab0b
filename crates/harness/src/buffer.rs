//! Degree-of-freedom buffer and its fill pattern

use bench_core::Real;
use rayon::prelude::*;
use tracing::instrument;

/// Data units filled by one parallel task
const FILL_CHUNK: usize = 64 * 1024;

/// Value of data unit `index` after filling a buffer of `len` units for `iteration`
#[inline]
pub fn expected_value(iteration: u64, len: usize, index: usize) -> Real {
    iteration
        .wrapping_mul(len as u64)
        .wrapping_add(index as u64) as Real
}

/// Buffer of data units written by every iteration
#[derive(Debug, Clone, PartialEq)]
pub struct DofBuffer {
    data: Vec<Real>,
}

impl DofBuffer {
    /// Allocate a zeroed buffer of `len` data units
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut self.data
    }

    /// Fill with the pattern of `iteration`, in parallel over disjoint chunks
    #[instrument(name = "fill_dofs", skip(self), fields(units = self.data.len()))]
    pub fn fill(&mut self, iteration: u64) {
        let len = self.data.len();
        self.data
            .par_chunks_mut(FILL_CHUNK)
            .enumerate()
            .for_each(|(chunk, values)| {
                let start = chunk * FILL_CHUNK;
                for (offset, value) in values.iter_mut().enumerate() {
                    *value = expected_value(iteration, len, start + offset);
                }
            });
    }

    /// Index of the first data unit that does not match the pattern of `iteration`
    pub fn verify(&self, iteration: u64) -> Option<usize> {
        let len = self.data.len();
        self.data
            .par_iter()
            .enumerate()
            .find_first(|(index, value)| **value != expected_value(iteration, len, *index))
            .map(|(index, _)| index)
    }
}
