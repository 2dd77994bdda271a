//! Concurrency governor.
//!
//! Admission control for job execution. A plain semaphore cannot lower its
//! ceiling below the number of outstanding permits, so the governor keeps
//! its own count plus a FIFO waiter list behind one mutex. Lowering the
//! ceiling never interrupts running jobs; it only gates new admissions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("All processing slots are busy")]
    Busy,

    #[error("Timed out waiting for a processing slot")]
    TimedOut,
}

/// Governor configuration.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Starting ceiling
    pub initial: usize,
    /// Lowest the ceiling may be driven
    pub min: usize,
    /// Highest the ceiling may be driven
    pub max: usize,
    /// Error rate above which the ceiling is lowered
    pub error_rate_threshold: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            initial: 4,
            min: 1,
            max: 8,
            error_rate_threshold: 0.5,
        }
    }
}

struct State {
    ceiling: usize,
    active: usize,
    waiters: VecDeque<oneshot::Sender<Slot>>,
}

struct Shared {
    state: Mutex<State>,
    config: GovernorConfig,
}

/// An admitted processing slot.
///
/// Releasing is idempotent and dropping the slot releases it, so a panicked
/// or cancelled job can never leak capacity.
pub struct Slot {
    shared: Arc<Shared>,
    released: AtomicBool,
}

impl Slot {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            released: AtomicBool::new(false),
        }
    }

    /// Release the slot. Further calls are no-ops.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active -= 1;
        Shared::pump(&self.shared, &mut state);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl Shared {
    /// Hand slots to waiters while capacity remains. Callers hold the lock.
    fn pump(shared: &Arc<Shared>, state: &mut State) {
        while state.active < state.ceiling {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.active += 1;
            if let Err(slot) = waiter.send(Slot::new(Arc::clone(shared))) {
                // Receiver gave up; take the count back without re-pumping
                // through Slot::release (we already hold the lock).
                slot.released.store(true, Ordering::SeqCst);
                state.active -= 1;
            }
        }
    }
}

/// The concurrency governor.
#[derive(Clone)]
pub struct Governor {
    shared: Arc<Shared>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        let initial = config.initial.clamp(config.min, config.max);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    ceiling: initial,
                    active: 0,
                    waiters: VecDeque::new(),
                }),
                config,
            }),
        }
    }

    /// Acquire a slot, waiting up to `timeout` in FIFO order.
    ///
    /// A zero timeout fails fast with `Busy`; a positive timeout that
    /// expires fails with `TimedOut`.
    pub async fn acquire(&self, timeout: Duration) -> Result<Slot, ResourceError> {
        let rx = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.active < state.ceiling {
                state.active += 1;
                return Ok(Slot::new(Arc::clone(&self.shared)));
            }
            if timeout.is_zero() {
                return Err(ResourceError::Busy);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(slot)) => Ok(slot),
            // Sender dropped without granting; treat as a timeout.
            Ok(Err(_)) => Err(ResourceError::TimedOut),
            Err(_) => Err(ResourceError::TimedOut),
        }
    }

    /// Move the ceiling to `new_ceiling`, clamped to `[min, max]`.
    /// Returns the effective ceiling.
    pub fn set_ceiling(&self, new_ceiling: usize) -> usize {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let clamped = new_ceiling.clamp(self.shared.config.min, self.shared.config.max);
        if clamped != state.ceiling {
            info!(
                "Concurrency ceiling adjusted: {} -> {}",
                state.ceiling, clamped
            );
            state.ceiling = clamped;
            Shared::pump(&self.shared, &mut state);
        }
        clamped
    }

    /// Adjust the ceiling from an observed error rate.
    ///
    /// Above the threshold the ceiling steps down by one; at half the
    /// threshold or below it steps back up. Returns the effective ceiling.
    pub fn adjust_for_error_rate(&self, error_rate: f64) -> usize {
        let (current, threshold) = {
            let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.ceiling, self.shared.config.error_rate_threshold)
        };
        if error_rate > threshold {
            debug!(
                "Error rate {:.2} above threshold {:.2}, lowering ceiling",
                error_rate, threshold
            );
            self.set_ceiling(current.saturating_sub(1))
        } else if error_rate <= threshold / 2.0 {
            self.set_ceiling(current + 1)
        } else {
            current
        }
    }

    pub fn active(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
    }

    pub fn ceiling(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(initial: usize, min: usize, max: usize) -> Governor {
        Governor::new(GovernorConfig {
            initial,
            min,
            max,
            error_rate_threshold: 0.5,
        })
    }

    #[tokio::test]
    async fn admits_up_to_ceiling() {
        let g = governor(2, 1, 4);
        let a = g.acquire(Duration::ZERO).await.unwrap();
        let _b = g.acquire(Duration::ZERO).await.unwrap();
        assert_eq!(g.active(), 2);

        assert_eq!(
            g.acquire(Duration::ZERO).await.unwrap_err(),
            ResourceError::Busy
        );

        a.release();
        assert_eq!(g.active(), 1);
        let _c = g.acquire(Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn positive_timeout_expires_as_timed_out() {
        let g = governor(1, 1, 4);
        let _held = g.acquire(Duration::ZERO).await.unwrap();
        assert_eq!(
            g.acquire(Duration::from_millis(50)).await.unwrap_err(),
            ResourceError::TimedOut
        );
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let g = governor(1, 1, 4);
        let slot = g.acquire(Duration::ZERO).await.unwrap();
        slot.release();
        slot.release();
        drop(slot);
        assert_eq!(g.active(), 0);
        let _again = g.acquire(Duration::ZERO).await.unwrap();
        assert_eq!(g.active(), 1);
    }

    #[tokio::test]
    async fn dropping_a_slot_releases_it() {
        let g = governor(1, 1, 4);
        {
            let _slot = g.acquire(Duration::ZERO).await.unwrap();
            assert_eq!(g.active(), 1);
        }
        assert_eq!(g.active(), 0);
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let g = governor(1, 1, 4);
        let held = g.acquire(Duration::ZERO).await.unwrap();

        let g1 = g.clone();
        let first = tokio::spawn(async move { g1.acquire(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let g2 = g.clone();
        let second = tokio::spawn(async move { g2.acquire(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        held.release();
        let first_slot = first.await.unwrap().unwrap();
        // Second waiter is still queued until the first slot frees.
        assert!(!second.is_finished());
        first_slot.release();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lowered_ceiling_lets_active_jobs_finish() {
        let g = governor(3, 1, 4);
        let a = g.acquire(Duration::ZERO).await.unwrap();
        let b = g.acquire(Duration::ZERO).await.unwrap();
        let c = g.acquire(Duration::ZERO).await.unwrap();

        assert_eq!(g.set_ceiling(1), 1);
        assert_eq!(g.active(), 3);

        // Releases above the new ceiling free no admission room until the
        // count drops below it.
        a.release();
        b.release();
        assert_eq!(
            g.acquire(Duration::ZERO).await.unwrap_err(),
            ResourceError::Busy
        );
        c.release();
        let _d = g.acquire(Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn raising_ceiling_wakes_waiters() {
        let g = governor(1, 1, 4);
        let _held = g.acquire(Duration::ZERO).await.unwrap();

        let g1 = g.clone();
        let waiter = tokio::spawn(async move { g1.acquire(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        g.set_ceiling(2);
        let _woken = waiter.await.unwrap().unwrap();
        assert_eq!(g.active(), 2);
    }

    #[tokio::test]
    async fn ceiling_clamps_to_bounds() {
        let g = governor(2, 1, 4);
        assert_eq!(g.set_ceiling(100), 4);
        assert_eq!(g.set_ceiling(0), 1);
    }

    #[tokio::test]
    async fn error_rate_steps_ceiling() {
        let g = governor(3, 1, 4);
        assert_eq!(g.adjust_for_error_rate(0.8), 2);
        assert_eq!(g.adjust_for_error_rate(0.8), 1);
        // Floor holds.
        assert_eq!(g.adjust_for_error_rate(0.9), 1);
        // Recovery steps back up.
        assert_eq!(g.adjust_for_error_rate(0.1), 2);
        // Mid-band leaves the ceiling alone.
        assert_eq!(g.adjust_for_error_rate(0.4), 2);
    }

    #[tokio::test]
    async fn burst_never_exceeds_ceiling() {
        let g = governor(4, 1, 8);
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let g = g.clone();
            tasks.push(tokio::spawn(async move {
                let slot = g.acquire(Duration::from_secs(5)).await.unwrap();
                let active = g.active();
                tokio::time::sleep(Duration::from_millis(5)).await;
                slot.release();
                active
            }));
        }
        for task in tasks {
            let observed = task.await.unwrap();
            assert!(observed <= 4, "active {observed} exceeded ceiling");
        }
        assert_eq!(g.active(), 0);
    }
}
