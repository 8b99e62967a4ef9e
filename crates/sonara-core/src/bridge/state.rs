//! Cross-domain signaling state
//!
//! A small vector of atomic counters shared between the control and render
//! domains, with blocking wait/notify semantics on top. A waiter blocks
//! until the value at an index moves away from the value it last observed,
//! or until a timeout elapses; either way it re-reads and returns the latest
//! value, so a timed-out waiter always proceeds with current state.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Total frames submitted by the control side (wrapping).
pub const STATE_FRAMES_PENDING: usize = 0;
/// Total frames consumed by the render side (wrapping).
pub const STATE_FRAMES_CONSUMED: usize = 1;
/// Nonzero while the device callback is live.
pub const STATE_RUNNING: usize = 2;

const STATE_LEN: usize = 3;

/// Shared signaling vector for the threaded bridge.
pub struct SharedState {
    values: [AtomicI32; STATE_LEN],
    lock: Mutex<()>,
    notify: Condvar,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            values: [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)],
            lock: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> i32 {
        self.values[index].load(Ordering::Acquire)
    }

    pub fn set(&self, index: usize, value: i32) {
        self.values[index].store(value, Ordering::Release);
        self.wake();
    }

    /// Add to a counter and wake any waiters. Returns the new value.
    /// Counters wrap; consumers must compare with `wrapping_sub`.
    pub fn add(&self, index: usize, delta: i32) -> i32 {
        let previous = self.values[index].fetch_add(delta, Ordering::AcqRel);
        self.wake();
        previous.wrapping_add(delta)
    }

    /// Block until the value at `index` differs from `expected` or the
    /// timeout elapses, then return the latest value.
    ///
    /// Never called from the render callback; the render side only does
    /// atomic loads and [`SharedState::add`].
    pub fn wait(&self, index: usize, expected: i32, timeout: Duration) -> i32 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let current = self.values[index].load(Ordering::Acquire);
            if current != expected {
                return current;
            }
            let now = Instant::now();
            if now >= deadline {
                return current;
            }
            let (next, result) = self
                .notify
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
            if result.timed_out() {
                return self.values[index].load(Ordering::Acquire);
            }
        }
    }

    fn wake(&self) {
        // Take the lock so a concurrent waiter can't miss the notification
        // between its value check and its wait
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.notify.notify_all();
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_on_changed_value() {
        let state = SharedState::new();
        state.add(STATE_FRAMES_PENDING, 5);
        let value = state.wait(STATE_FRAMES_PENDING, 0, Duration::from_secs(1));
        assert_eq!(value, 5);
    }

    #[test]
    fn test_wait_times_out_with_latest_value() {
        let state = SharedState::new();
        let start = Instant::now();
        let value = state.wait(STATE_RUNNING, 0, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(value, 0);
    }

    #[test]
    fn test_wait_wakes_on_notify() {
        let state = Arc::new(SharedState::new());
        let waiter_state = Arc::clone(&state);
        let waiter = thread::spawn(move || {
            waiter_state.wait(STATE_FRAMES_CONSUMED, 0, Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(10));
        state.add(STATE_FRAMES_CONSUMED, 128);

        assert_eq!(waiter.join().unwrap(), 128);
    }

    #[test]
    fn test_counters_wrap() {
        let state = SharedState::new();
        state.set(STATE_FRAMES_PENDING, i32::MAX);
        let value = state.add(STATE_FRAMES_PENDING, 1);
        assert_eq!(value, i32::MIN);
        // Wrapping difference still measures in-flight frames
        assert_eq!(value.wrapping_sub(i32::MAX), 1);
    }
}
