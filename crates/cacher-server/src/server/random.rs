use rand::{Rng, rng};

/// A trait for random sources that return integers from an inclusive range.
///
/// Resource selection and TTL jitter both draw from a `RandSource` passed in
/// by the caller, so tests can plug in a fixed or seeded source instead of
/// process-global randomness.
pub trait RandSource: Send + Sync {
    /// Returns an integer uniformly distributed in `low..=high`.
    ///
    /// Callers guarantee `low <= high`.
    fn rand_inclusive(&self, low: u64, high: u64) -> u64;
}

/// A `RandSource` that uses the thread-local RNG (`rand::rng()`).
///
/// This type does not store the RNG itself; it accesses the thread-local
/// generator on each call, so it is safe to share across tasks and threads.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn rand_inclusive(&self, low: u64, high: u64) -> u64 {
        rng().random_range(low..=high)
    }
}

#[cfg(test)]
pub mod testing {
    use super::RandSource;
    use parking_lot::Mutex;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    /// Deterministic source backed by a seeded `StdRng`.
    pub struct SeededRandom(Mutex<StdRng>);

    impl SeededRandom {
        pub fn new(seed: u64) -> Self {
            Self(Mutex::new(StdRng::seed_from_u64(seed)))
        }
    }

    impl RandSource for SeededRandom {
        fn rand_inclusive(&self, low: u64, high: u64) -> u64 {
            self.0.lock().random_range(low..=high)
        }
    }

    /// Always answers with one end of the requested range.
    pub enum Extreme {
        Low,
        High,
    }

    impl RandSource for Extreme {
        fn rand_inclusive(&self, low: u64, high: u64) -> u64 {
            match self {
                Self::Low => low,
                Self::High => high,
            }
        }
    }
}
