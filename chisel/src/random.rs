//! Random number generation provider abstraction.
//!
//! Used for manifest version tokens and for loss injection in the
//! [`loopback`](crate::loopback) network.

use std::cell::RefCell;
use std::ops::Range;

use rand::distr::{Distribution, StandardUniform, uniform::SampleUniform};
use rand::prelude::*;

/// Provider trait for random number generation.
pub trait RandomProvider: Clone {
    /// Generate a random value of type T.
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>;

    /// Generate a random value within `start..end`.
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;

    /// Generate a random bool with the given probability of being true.
    ///
    /// Probabilities `<= 0.0` never fire and `>= 1.0` always fire.
    fn random_bool(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.random::<f64>() < probability
    }
}

/// Production random provider using the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::rng());
}

impl RandomProvider for TokioRandomProvider {
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>,
    {
        RNG.with(|rng| rng.borrow_mut().random())
    }

    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        RNG.with(|rng| rng.borrow_mut().random_range(range))
    }
}
