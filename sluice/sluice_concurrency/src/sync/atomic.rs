//! Atomic counters, flags, and index sources.
//!
//! These are the shared-state primitives the pool and the parallel
//! sequence engine coordinate through: no locks, plain atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// A counter that can be incremented, decremented, and read atomically.
///
/// Used for the pool's total/active/failed metrics and for the global
/// skip/take cutoffs in parallel pipelines.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicUsize,
}

impl AtomicCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self {
            value: AtomicUsize::new(0),
        }
    }

    /// Increment the counter and return the new value.
    pub fn increment(&self) -> usize {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the counter and return the new value.
    pub fn decrement(&self) -> usize {
        self.value.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Get the current value.
    pub fn get(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }

    /// Reset the counter to zero, returning the old value.
    pub fn reset(&self) -> usize {
        self.value.swap(0, Ordering::SeqCst)
    }
}

/// A one-way flag that can be raised atomically.
///
/// Raising is sticky: once set, the flag stays set until the owner is
/// replaced wholesale. This is the cooperative stop signal checked at
/// every queue suspension point.
#[derive(Debug, Default)]
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// Create an unraised flag.
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Raise the flag.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Raise the flag if it is not already raised.
    ///
    /// Returns true if this call raised it, false if it was already up.
    pub fn try_set(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    /// Check whether the flag is raised.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A monotonically increasing sequence number source.
///
/// Hands out the task indices that key the pool's result map.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    value: AtomicU64,
}

impl AtomicSequence {
    /// Create a sequence starting at zero.
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Take the next sequence number.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current (next to be handed out) sequence number.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Reset the sequence to `start`, returning the old value.
    pub fn reset(&self, start: u64) -> u64 {
        self.value.swap(start, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_basic() {
        let counter = AtomicCounter::new();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.reset(), 1);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let counter = Arc::new(AtomicCounter::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    counter.increment();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(), 8 * 1000);
    }

    #[test]
    fn test_flag_try_set_single_winner() {
        let flag = Arc::new(AtomicFlag::new());
        let winners = Arc::new(AtomicCounter::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let flag = Arc::clone(&flag);
            let winners = Arc::clone(&winners);
            handles.push(thread::spawn(move || {
                if flag.try_set() {
                    winners.increment();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.get(), 1);
        assert!(flag.is_set());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = AtomicSequence::new();
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.current(), 2);
        assert_eq!(seq.reset(0), 2);
        assert_eq!(seq.next(), 0);
    }
}
