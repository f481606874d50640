//! Injectable scalar heuristics
//!
//! Every place the swarm needs a score it cannot derive from state (innovation
//! scores, simulated confidence, simulated work delay, bid duration estimates)
//! goes through [`Heuristic`]. Tests plug in [`Fixed`]; production uses
//! [`SeededUniform`], which is reproducible when given a seed.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of a scalar score for a keyed subject (usually a worker id)
pub trait Heuristic: Send + Sync {
    fn sample(&self, key: &str) -> f64;
}

/// Shared reference to a heuristic
pub type SharedHeuristic = Arc<dyn Heuristic>;

/// Always returns the same value
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub f64);

impl Heuristic for Fixed {
    fn sample(&self, _key: &str) -> f64 {
        self.0
    }
}

/// Uniform samples from `[low, high)` drawn from a seedable generator
pub struct SeededUniform {
    rng: Mutex<StdRng>,
    low: f64,
    high: f64,
}

impl SeededUniform {
    pub fn new(low: f64, high: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            rng: Mutex::new(rng),
            low,
            high,
        }
    }

    pub fn shared(self) -> SharedHeuristic {
        Arc::new(self)
    }
}

impl Heuristic for SeededUniform {
    fn sample(&self, _key: &str) -> f64 {
        if self.high <= self.low {
            return self.low;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(self.low..self.high)
    }
}

/// Derive a distinct seed per heuristic from one configured seed
pub fn derive_seed(seed: Option<u64>, stream: u64) -> Option<u64> {
    seed.map(|s| s.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(stream))
}

/// Duration from a sampled number of seconds.
///
/// Negative, NaN, infinite and out-of-range samples map to zero.
pub fn sampled_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}
