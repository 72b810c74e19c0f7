//! Tick provider abstraction for frame-driven scheduling.
//!
//! Batching granularity in chisel is one scheduler tick: the batcher flushes
//! calls on the next tick boundary, and the server emits at most one response
//! batch per tick per connection. The host decides what a tick is.
//!
//! - [`TokioTickProvider`]: fixed-interval frames on tokio time
//! - [`ManualTickProvider`]: ticks advance only when the host calls
//!   [`ManualTickProvider::advance`], which makes scheduling fully
//!   deterministic

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_trait::async_trait;

/// Default frame interval: 60 ticks per second.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_nanos(16_666_667);

/// Provider trait for the host's per-frame scheduler.
#[async_trait(?Send)]
pub trait TickProvider: Clone {
    /// Suspend until the next tick boundary.
    ///
    /// This is a cooperative yield: other tasks keep running while the
    /// caller waits.
    async fn next_tick(&self);

    /// Index of the current tick.
    fn current_tick(&self) -> u64;

    /// Suspend for `ticks` tick boundaries.
    async fn wait_ticks(&self, ticks: u64) {
        for _ in 0..ticks {
            self.next_tick().await;
        }
    }

    /// Suspend until the tick index reaches `tick`.
    ///
    /// Returns immediately if it already has. Unlike [`wait_ticks`], the
    /// target is fixed by the caller, so a task that starts late still
    /// wakes on the intended boundary.
    ///
    /// [`wait_ticks`]: TickProvider::wait_ticks
    async fn wait_until(&self, tick: u64) {
        while self.current_tick() < tick {
            self.next_tick().await;
        }
    }
}

/// Fixed-interval ticks on tokio time.
///
/// Tick `n` starts at `start + n * interval`, so every waiter released by the
/// same boundary observes the same tick index.
#[derive(Debug, Clone)]
pub struct TokioTickProvider {
    interval: Duration,
    start: tokio::time::Instant,
}

impl TokioTickProvider {
    /// Create a provider ticking every `interval`.
    ///
    /// A zero interval falls back to [`DEFAULT_TICK_INTERVAL`].
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_TICK_INTERVAL
        } else {
            interval
        };
        Self {
            interval,
            start: tokio::time::Instant::now(),
        }
    }

    /// Configured frame interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn boundary(&self, tick: u64) -> tokio::time::Instant {
        let nanos = self.interval.as_nanos().saturating_mul(u128::from(tick));
        let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.start + offset
    }
}

impl Default for TokioTickProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

#[async_trait(?Send)]
impl TickProvider for TokioTickProvider {
    async fn next_tick(&self) {
        let target = self.current_tick().saturating_add(1);
        tokio::time::sleep_until(self.boundary(target)).await;
    }

    fn current_tick(&self) -> u64 {
        let elapsed = self.start.elapsed().as_nanos();
        u64::try_from(elapsed / self.interval.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Host-driven ticks.
///
/// Cloning shares the same tick counter.
#[derive(Debug, Clone, Default)]
pub struct ManualTickProvider {
    inner: Rc<RefCell<ManualTickState>>,
}

#[derive(Debug, Default)]
struct ManualTickState {
    tick: u64,
    wakers: Vec<Waker>,
}

impl ManualTickProvider {
    /// Create a provider at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross one tick boundary, releasing every waiter. Returns the new tick.
    pub fn advance(&self) -> u64 {
        let mut state = self.inner.borrow_mut();
        state.tick += 1;
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
        state.tick
    }

    /// Number of tasks currently parked on a tick boundary.
    pub fn waiters(&self) -> usize {
        self.inner.borrow().wakers.len()
    }
}

#[async_trait(?Send)]
impl TickProvider for ManualTickProvider {
    async fn next_tick(&self) {
        let target = self.current_tick() + 1;
        TickWait {
            state: Rc::clone(&self.inner),
            target,
        }
        .await
    }

    fn current_tick(&self) -> u64 {
        self.inner.borrow().tick
    }
}

/// Future resolving once the manual tick counter reaches `target`.
struct TickWait {
    state: Rc<RefCell<ManualTickState>>,
    target: u64,
}

impl Future for TickWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.tick >= self.target {
            return Poll::Ready(());
        }
        state.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_ticks_align_to_interval() {
        let ticks = TokioTickProvider::new(Duration::from_millis(10));
        assert_eq!(ticks.current_tick(), 0);

        ticks.next_tick().await;
        assert_eq!(ticks.current_tick(), 1);

        tokio::time::sleep(Duration::from_millis(3)).await;
        ticks.next_tick().await;
        assert_eq!(ticks.current_tick(), 2);

        ticks.wait_ticks(3).await;
        assert_eq!(ticks.current_tick(), 5);
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .expect("runtime");
        rt.block_on(async {
            let ticks = TokioTickProvider::new(Duration::ZERO);
            assert_eq!(ticks.interval(), DEFAULT_TICK_INTERVAL);
        });
    }

    #[tokio::test]
    async fn test_manual_tick_releases_waiters() {
        let ticks = ManualTickProvider::new();
        let released = Rc::new(Cell::new(false));

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let waiter_ticks = ticks.clone();
                let flag = released.clone();
                tokio::task::spawn_local(async move {
                    waiter_ticks.next_tick().await;
                    flag.set(true);
                });

                tokio::task::yield_now().await;
                assert!(!released.get());
                assert_eq!(ticks.waiters(), 1);

                assert_eq!(ticks.advance(), 1);
                tokio::task::yield_now().await;
                assert!(released.get());
                assert_eq!(ticks.waiters(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_manual_next_tick_targets_following_boundary() {
        let ticks = ManualTickProvider::new();
        ticks.advance();
        ticks.advance();

        let mut wait = Box::pin(ticks.next_tick());
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(wait.as_mut().poll(&mut cx).is_pending());

        ticks.advance();
        assert!(wait.as_mut().poll(&mut cx).is_ready());
    }

    #[tokio::test]
    async fn test_wait_until_fixed_target() {
        let ticks = ManualTickProvider::new();
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut wait = Box::pin(ticks.wait_until(2));
        assert!(wait.as_mut().poll(&mut cx).is_pending());
        ticks.advance();
        assert!(wait.as_mut().poll(&mut cx).is_pending());
        ticks.advance();
        assert!(wait.as_mut().poll(&mut cx).is_ready());

        let mut past = Box::pin(ticks.wait_until(1));
        assert!(past.as_mut().poll(&mut cx).is_ready());
    }
}
