//! Provider bundle trait for simplified type parameters.
//!
//! Batchers, servers and the loopback network all need the same three
//! capabilities: a tick source, a local task spawner and randomness.
//! Bundling them keeps signatures at `struct Server<P: Providers>` instead of
//! three separate type parameters with repeated where clauses.
//!
//! ```rust,ignore
//! use chisel::{Providers, TokioProviders};
//!
//! let providers = TokioProviders::new();
//! let tick = providers.tick().current_tick();
//! ```

use std::time::Duration;

use crate::random::{RandomProvider, TokioRandomProvider};
use crate::task::{TaskProvider, TokioTaskProvider};
use crate::tick::{DEFAULT_TICK_INTERVAL, ManualTickProvider, TickProvider, TokioTickProvider};

/// Bundle of all provider types for a runtime environment.
pub trait Providers: Clone + 'static {
    /// Tick source.
    type Tick: TickProvider + 'static;

    /// Local task spawner.
    type Task: TaskProvider + 'static;

    /// Randomness source.
    type Random: RandomProvider + 'static;

    /// Get the tick provider instance.
    fn tick(&self) -> &Self::Tick;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production providers: fixed-interval tokio ticks.
#[derive(Debug, Clone)]
pub struct TokioProviders {
    tick: TokioTickProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Providers ticking at [`DEFAULT_TICK_INTERVAL`].
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_TICK_INTERVAL)
    }

    /// Providers ticking every `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            tick: TokioTickProvider::new(interval),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Tick = TokioTickProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn tick(&self) -> &Self::Tick {
        &self.tick
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

/// Host-driven providers: ticks advance only through
/// [`ManualProviders::advance`].
#[derive(Debug, Clone, Default)]
pub struct ManualProviders {
    tick: ManualTickProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl ManualProviders {
    /// Create providers at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross one tick boundary. Returns the new tick index.
    pub fn advance(&self) -> u64 {
        self.tick.advance()
    }
}

impl Providers for ManualProviders {
    type Tick = ManualTickProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn tick(&self) -> &Self::Tick {
        &self.tick
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_providers_share_tick_across_clones() {
        let providers = ManualProviders::new();
        let clone = providers.clone();
        providers.advance();
        assert_eq!(clone.tick().current_tick(), 1);
    }
}
