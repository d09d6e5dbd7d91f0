//! Deterministic per-gridblock RNG substreams, built on `Pcg64`'s built-in
//! stream selector rather than a hand-rolled SplitMix.

use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// Owns the grid-level seed and hands out one independent, reproducible
/// substream per gridblock index, regardless of the order callers request
/// them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngSource {
    seed: u64,
}

impl RngSource {
    pub fn new(seed: u64) -> Self {
        RngSource { seed }
    }

    /// A `Pcg64` stream dedicated to gridblock `index`, selected via the
    /// generator's 128-bit stream parameter rather than reseeding — two
    /// substreams never alias even for adjacent indices.
    pub fn substream(&self, index: usize) -> Pcg64 {
        Pcg64::new(self.seed as u128, (index as u128) << 1 | 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn distinct_gridblocks_get_distinct_substreams() {
        let source = RngSource::new(42);
        let mut a = source.substream(0);
        let mut b = source.substream(1);
        let sample_a: f64 = a.gen();
        let sample_b: f64 = b.gen();
        assert_ne!(sample_a, sample_b);
    }

    #[test]
    fn same_index_is_reproducible() {
        let source = RngSource::new(7);
        let mut a = source.substream(3);
        let mut b = source.substream(3);
        let sample_a: f64 = a.gen();
        let sample_b: f64 = b.gen();
        assert_eq!(sample_a, sample_b);
    }
}
