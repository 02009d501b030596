//! Weighted discrete sampling shared by the jackpot, mystery bag and
//! giveaway draws.
//!
//! Randomness is injected through [`RandomSource`]. Production code uses
//! [`OsRandom`], which draws from the thread-local CSPRNG that `rand`
//! reseeds from the operating system. Tests use [`SeededRandom`].

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Errors building a weighted table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplingError {
    #[error("weighted table has no entries")]
    Empty,

    #[error("weighted table total weight is zero")]
    ZeroTotal,

    #[error("weighted table total weight overflows u64")]
    Overflow,
}

/// Source of uniform randomness.
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[0, bound)`. `bound` must be non-zero.
    fn below(&self, bound: u64) -> u64;

    /// Bernoulli trial with probability `p` (clamped to `[0, 1]`).
    fn chance(&self, p: f64) -> bool;
}

/// Thread-local OS-seeded CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn below(&self, bound: u64) -> u64 {
        rand::rng().random_range(0..bound)
    }

    fn chance(&self, p: f64) -> bool {
        bernoulli(&mut rand::rng(), p)
    }
}

/// Deterministic source for tests and replayable simulations.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl RandomSource for SeededRandom {
    fn below(&self, bound: u64) -> u64 {
        self.with_rng(|rng| rng.random_range(0..bound))
    }

    fn chance(&self, p: f64) -> bool {
        self.with_rng(|rng| bernoulli(rng, p))
    }
}

fn bernoulli<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    // NaN and non-positive probabilities never fire
    if !(p > 0.0) {
        return false;
    }
    if p >= 1.0 {
        return true;
    }
    rng.random_bool(p)
}

/// Immutable `(value, weight)` table with precomputed cumulative weights.
#[derive(Debug, Clone)]
pub struct WeightedTable<T> {
    values: Vec<T>,
    weights: Vec<u64>,
    cumulative: Vec<u64>,
}

impl<T> WeightedTable<T> {
    /// Build a table. Zero-weight entries are kept but can never be drawn.
    pub fn new(entries: impl IntoIterator<Item = (T, u64)>) -> Result<Self, SamplingError> {
        let mut values = Vec::new();
        let mut weights = Vec::new();
        let mut cumulative = Vec::new();
        let mut running: u64 = 0;

        for (value, weight) in entries {
            running = running.checked_add(weight).ok_or(SamplingError::Overflow)?;
            values.push(value);
            weights.push(weight);
            cumulative.push(running);
        }

        if values.is_empty() {
            return Err(SamplingError::Empty);
        }
        if running == 0 {
            return Err(SamplingError::ZeroTotal);
        }

        Ok(Self {
            values,
            weights,
            cumulative,
        })
    }

    pub fn total(&self) -> u64 {
        // Non-empty by construction
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the first entry whose cumulative weight exceeds `r`.
    ///
    /// `r` is reduced modulo the total so any `u64` maps to an entry.
    pub fn index_for(&self, r: u64) -> usize {
        let r = r % self.total();
        self.cumulative.partition_point(|&c| c <= r)
    }

    pub fn pick(&self, r: u64) -> &T {
        &self.values[self.index_for(r)]
    }

    pub fn sample(&self, source: &dyn RandomSource) -> &T {
        self.pick(source.below(self.total()))
    }

    /// Expected probability of the entry at `index`.
    pub fn probability(&self, index: usize) -> f64 {
        self.weights[index] as f64 / self.total() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, u64)> {
        self.values.iter().zip(self.weights.iter().copied())
    }
}
