use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Thread-safe random source shared by sampling and score perturbation.
///
/// This is the only mutable state touched while serving. Callers hold the lock
/// only for the duration of one draw.
#[derive(Debug)]
pub struct SharedRng {
    inner: Mutex<StdRng>,
}

impl SharedRng {
    /// Reproducible source for tests and pinned deployments.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            inner: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// `seeded` when a seed is given, otherwise entropy.
    pub fn from_seed_opt(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    fn lock(&self) -> MutexGuard<'_, StdRng> {
        // A panic mid-draw leaves the generator state intact
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `amount` distinct positions out of `0..len`, in random order.
    pub fn sample_indices(&self, len: usize, amount: usize) -> Vec<usize> {
        let amount = amount.min(len);
        let mut rng = self.lock();
        rand::seq::index::sample(&mut *rng, len, amount).into_vec()
    }

    /// Uniform draw from `[-amplitude, amplitude]`. A non-positive or non-finite amplitude gives 0.
    pub fn perturbation(&self, amplitude: f64) -> f64 {
        if !amplitude.is_finite() || amplitude <= 0.0 {
            return 0.0;
        }
        self.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sample_indices_distinct_and_capped() {
        let rng = SharedRng::seeded(1);
        let picks = rng.sample_indices(10, 4);
        assert_eq!(picks.len(), 4);
        assert_eq!(picks.iter().collect::<HashSet<_>>().len(), 4);
        assert!(picks.iter().all(|&i| i < 10));

        assert_eq!(rng.sample_indices(3, 50).len(), 3);
        assert!(rng.sample_indices(0, 5).is_empty());
    }

    #[test]
    fn test_same_seed_same_draws() {
        let a = SharedRng::seeded(99);
        let b = SharedRng::seeded(99);
        assert_eq!(a.sample_indices(100, 5), b.sample_indices(100, 5));
        assert_eq!(a.perturbation(5.0), b.perturbation(5.0));
    }

    #[test]
    fn test_perturbation_bounds() {
        let rng = SharedRng::seeded(3);
        for _ in 0..1000 {
            let p = rng.perturbation(5.0);
            assert!((-5.0..=5.0).contains(&p));
        }
        assert_eq!(rng.perturbation(0.0), 0.0);
        assert_eq!(rng.perturbation(f64::NAN), 0.0);
    }

    #[test]
    fn test_shared_across_threads() {
        let rng = Arc::new(SharedRng::seeded(5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rng = Arc::clone(&rng);
                std::thread::spawn(move || rng.sample_indices(20, 3).len())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 3);
        }
    }
}
