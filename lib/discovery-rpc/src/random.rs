//! Injectable randomness for node selection and port allocation

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::sync::Mutex;

/// Shared random number source
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    /// Seed from the operating system
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic source, for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniform index in `[0, len)`, or `None` when `len` is zero
    pub fn index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.with_rng(|rng| rng.gen_range(0..len)))
    }

    /// Uniform value in `range`, or `None` when the range is empty
    pub fn in_range(&self, range: &RangeInclusive<u16>) -> Option<u16> {
        if range.is_empty() {
            return None;
        }
        Some(self.with_rng(|rng| rng.gen_range(range.clone())))
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}
