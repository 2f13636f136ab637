//! Condition variables (spec C5).
//!
//! [`Condvar::wait`] takes the [`Mutex`](crate::mutex::Mutex) the caller is
//! already holding, atomically releases it and parks the calling thread,
//! then reacquires it before returning — the same three-step contract as
//! `pthread_cond_wait`. Spurious wakeups are possible on every backend;
//! callers must re-check their predicate in a loop, same as with any
//! condition variable.

use crate::error::{io_error, Error};
use crate::mutex::Mutex;
use log::warn;

/// A condition variable paired with a caller-supplied [`Mutex`] at each
/// `wait` call.
pub struct Condvar {
    inner: backend::CondvarImpl,
}

impl Condvar {
    /// Creates a new condition variable with no waiters.
    pub fn new() -> Result<Self, Error> {
        Ok(Condvar {
            inner: backend::CondvarImpl::new()?,
        })
    }

    /// Atomically unlocks `mutex` and blocks the caller, then relocks
    /// `mutex` before returning. `mutex` must be the same lock the caller
    /// is holding and the one every other waiter on this condvar uses.
    pub fn wait(&self, mutex: &Mutex) {
        self.inner.wait(mutex);
    }

    /// Wakes at most one waiting thread, if any are waiting.
    pub fn signal(&self) {
        self.inner.signal();
    }

    /// Wakes every thread currently waiting.
    pub fn broadcast(&self) {
        self.inner.broadcast();
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        if self.inner.has_waiters() {
            warn!("Condvar dropped while threads are still waiting on it");
        }
    }
}

#[cfg(unix)]
mod backend {
    use super::*;
    use std::cell::UnsafeCell;
    use std::mem::MaybeUninit;
    use std::sync::atomic::{AtomicIsize, Ordering};

    pub struct CondvarImpl {
        hdl: UnsafeCell<libc::pthread_cond_t>,
        waiters: AtomicIsize,
    }

    unsafe impl Send for CondvarImpl {}
    unsafe impl Sync for CondvarImpl {}

    impl CondvarImpl {
        pub fn new() -> Result<Self, Error> {
            let mut raw = MaybeUninit::<libc::pthread_cond_t>::uninit();
            let rc = unsafe { libc::pthread_cond_init(raw.as_mut_ptr(), std::ptr::null()) };
            if rc != 0 {
                return Err(io_error(rc, "pthread_cond_init failed"));
            }
            Ok(CondvarImpl {
                hdl: UnsafeCell::new(unsafe { raw.assume_init() }),
                waiters: AtomicIsize::new(0),
            })
        }

        pub fn wait(&self, mutex: &Mutex) {
            self.waiters.fetch_add(1, Ordering::SeqCst);
            let rc = unsafe { libc::pthread_cond_wait(self.hdl.get(), mutex.as_raw()) };
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            debug_assert_eq!(rc, 0, "pthread_cond_wait failed: {rc}");
        }

        pub fn signal(&self) {
            let rc = unsafe { libc::pthread_cond_signal(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_cond_signal failed: {rc}");
        }

        pub fn broadcast(&self) {
            let rc = unsafe { libc::pthread_cond_broadcast(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_cond_broadcast failed: {rc}");
        }

        pub fn has_waiters(&self) -> bool {
            self.waiters.load(Ordering::SeqCst) > 0
        }
    }

    impl Drop for CondvarImpl {
        fn drop(&mut self) {
            unsafe {
                libc::pthread_cond_destroy(self.hdl.get());
            }
        }
    }
}

#[cfg(windows)]
mod backend {
    use super::*;
    use std::sync::atomic::{AtomicIsize, Ordering};
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Threading::{
        CreateSemaphoreW, ReleaseSemaphore, WaitForSingleObjectEx, INFINITE,
    };

    /// Mirrors the semaphore-based implementation from "Strategies for
    /// Implementing POSIX Condition Variables on Win32" (Schmidt & Pyarali):
    /// a single counting semaphore plus a waiter count, bumped under the
    /// caller's mutex in `wait` and drained under it in `signal`/
    /// `broadcast`. `waiters` is only ever touched while the caller holds
    /// the paired mutex, except for the decrement on a failed wait below —
    /// matching the source's known narrow race on that path.
    pub struct CondvarImpl {
        waiters_sema: HANDLE,
        waiters: AtomicIsize,
    }

    unsafe impl Send for CondvarImpl {}
    unsafe impl Sync for CondvarImpl {}

    impl CondvarImpl {
        pub fn new() -> Result<Self, Error> {
            let sema =
                unsafe { CreateSemaphoreW(std::ptr::null(), 0, i32::MAX, std::ptr::null()) };
            if sema.is_null() {
                return Err(io_error(
                    crate::error::get_last_system(),
                    "CreateSemaphoreW failed",
                ));
            }
            Ok(CondvarImpl {
                waiters_sema: sema,
                waiters: AtomicIsize::new(0),
            })
        }

        pub fn wait(&self, mutex: &Mutex) {
            self.waiters.fetch_add(1, Ordering::SeqCst);
            mutex.unlock();
            let wait = unsafe { WaitForSingleObjectEx(self.waiters_sema, INFINITE, 0) };
            if wait != WAIT_OBJECT_0 {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
            }
            mutex.lock();
        }

        pub fn signal(&self) {
            if self.waiters.load(Ordering::SeqCst) > 0 {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
                unsafe {
                    ReleaseSemaphore(self.waiters_sema, 1, std::ptr::null_mut());
                }
            }
        }

        pub fn broadcast(&self) {
            let waiting = self.waiters.swap(0, Ordering::SeqCst);
            if waiting > 0 {
                unsafe {
                    ReleaseSemaphore(self.waiters_sema, waiting as i32, std::ptr::null_mut());
                }
            }
        }

        pub fn has_waiters(&self) -> bool {
            self.waiters.load(Ordering::SeqCst) > 0
        }
    }

    impl Drop for CondvarImpl {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.waiters_sema);
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod backend {
    use super::*;
    use std::sync::atomic::{AtomicIsize, Ordering};
    use std::sync::{Condvar as StdCondvar, Mutex as StdMutex};

    pub struct CondvarImpl {
        gate: StdMutex<u64>,
        cv: StdCondvar,
        waiters: AtomicIsize,
    }

    impl CondvarImpl {
        pub fn new() -> Result<Self, Error> {
            Ok(CondvarImpl {
                gate: StdMutex::new(0),
                cv: StdCondvar::new(),
                waiters: AtomicIsize::new(0),
            })
        }

        pub fn wait(&self, mutex: &Mutex) {
            self.waiters.fetch_add(1, Ordering::SeqCst);
            let generation = *self.gate.lock().unwrap_or_else(|p| p.into_inner());
            mutex.unlock();
            let guard = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            let _unused = self
                .cv
                .wait_while(guard, |g| *g == generation)
                .unwrap_or_else(|p| p.into_inner());
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            mutex.lock();
        }

        pub fn signal(&self) {
            let mut g = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            *g = g.wrapping_add(1);
            self.cv.notify_one();
        }

        pub fn broadcast(&self) {
            let mut g = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            *g = g.wrapping_add(1);
            self.cv.notify_all();
        }

        pub fn has_waiters(&self) -> bool {
            self.waiters.load(Ordering::SeqCst) > 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_wakes_single_waiter() {
        let mutex = Arc::new(Mutex::new().unwrap());
        let cond = Arc::new(Condvar::new().unwrap());
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let t = {
            let mutex = Arc::clone(&mutex);
            let cond = Arc::clone(&cond);
            let ready = Arc::clone(&ready);
            thread::spawn(move || {
                mutex.lock();
                while !ready.load(std::sync::atomic::Ordering::SeqCst) {
                    cond.wait(&mutex);
                }
                mutex.unlock();
            })
        };

        thread::sleep(Duration::from_millis(50));
        mutex.lock();
        ready.store(true, std::sync::atomic::Ordering::SeqCst);
        cond.signal();
        mutex.unlock();

        t.join().unwrap();
    }

    // CV-1: every signal/broadcast eventually unblocks a waiter that was
    // already parked when it was sent (no lost wakeup under the mutex
    // protocol above).
    #[test]
    fn test_cv_1_broadcast_wakes_all_waiters() {
        let mutex = Arc::new(Mutex::new().unwrap());
        let cond = Arc::new(Condvar::new().unwrap());
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let woken = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let cond = Arc::clone(&cond);
                let ready = Arc::clone(&ready);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    mutex.lock();
                    while !ready.load(std::sync::atomic::Ordering::SeqCst) {
                        cond.wait(&mutex);
                    }
                    mutex.unlock();
                    woken.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        mutex.lock();
        ready.store(true, std::sync::atomic::Ordering::SeqCst);
        cond.broadcast();
        mutex.unlock();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(woken.load(std::sync::atomic::Ordering::SeqCst), 6);
    }
}
