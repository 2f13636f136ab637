//! Spinlock (spec C4).
//!
//! Semantics identical to [`crate::mutex::Mutex`]: `new`/`lock`/`try_lock`/
//! `unlock`, unlocking an instance the caller doesn't hold is undefined.
//! When [`crate::atomic::is_lock_free`] reports a real lock-free atomics
//! backend, this spins on a single `AtomicBool` with the fetch-and-store
//! technique (same shape as the fast-path lock the pack's closest sibling
//! implements). When atomics are simulated, spinning would just thrash the
//! one global lock they're built on, so this degrades straight to
//! [`crate::mutex::Mutex`].

use crate::backoff::Backoff;
use crate::error::Error;
use crate::mutex::Mutex;
use core::sync::atomic::{AtomicBool, Ordering};

enum Repr {
    Atomic(AtomicBool),
    Degraded(Mutex),
}

pub struct Spinlock {
    repr: Repr,
}

impl Spinlock {
    pub fn new() -> Result<Self, Error> {
        let repr = if crate::atomic::is_lock_free() {
            Repr::Atomic(AtomicBool::new(false))
        } else {
            Repr::Degraded(Mutex::new()?)
        };
        Ok(Spinlock { repr })
    }

    pub fn lock(&self) {
        match &self.repr {
            Repr::Atomic(flag) => {
                let mut backoff = Backoff::new();
                while flag.swap(true, Ordering::Acquire) {
                    while flag.load(Ordering::Relaxed) {
                        backoff.spin();
                    }
                }
            }
            Repr::Degraded(mutex) => mutex.lock(),
        }
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        match &self.repr {
            Repr::Atomic(flag) => !flag.swap(true, Ordering::Acquire),
            Repr::Degraded(mutex) => mutex.try_lock(),
        }
    }

    pub fn unlock(&self) {
        match &self.repr {
            Repr::Atomic(flag) => flag.store(false, Ordering::Release),
            Repr::Degraded(mutex) => mutex.unlock(),
        }
    }

    /// Reports which of the two strategies this instance picked at
    /// construction time.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.repr, Repr::Degraded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let lock = Spinlock::new().unwrap();
        lock.lock();
        lock.unlock();
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = Spinlock::new().unwrap();
        lock.lock();
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    // MX-1 (as it applies to the spinlock's mutex-identical contract): at
    // most one thread is ever inside the critical section at a time.
    #[test]
    fn test_mx_1_mutual_exclusion() {
        let lock = Arc::new(Spinlock::new().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let in_critical = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                let in_critical = Arc::clone(&in_critical);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        lock.lock();
                        let now = in_critical.fetch_add(1, StdOrdering::SeqCst) + 1;
                        assert_eq!(now, 1);
                        counter.fetch_add(1, StdOrdering::SeqCst);
                        in_critical.fetch_sub(1, StdOrdering::SeqCst);
                        lock.unlock();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(StdOrdering::SeqCst), 16_000);
    }
}
