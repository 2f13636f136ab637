//! Reader-writer lock (spec C6).
//!
//! Multiple concurrent readers, or a single exclusive writer, never both at
//! once. Writers have priority over newly arriving readers: once a writer
//! is waiting, no further reader acquires the lock until that writer has
//! run. Like [`crate::mutex::Mutex`] this is a bare lock with no embedded
//! data — callers guard their own state with it.
//!
//! Unlocking the wrong side (`reader_unlock` on a writer-held lock or vice
//! versa) is undefined behavior on every backend.

use crate::error::{io_error, Error};
use log::warn;

pub struct RwLock {
    inner: backend::RwLockImpl,
}

impl RwLock {
    pub fn new() -> Result<Self, Error> {
        Ok(RwLock {
            inner: backend::RwLockImpl::new()?,
        })
    }

    pub fn reader_lock(&self) {
        self.inner.reader_lock();
    }

    #[must_use]
    pub fn reader_try_lock(&self) -> bool {
        self.inner.reader_try_lock()
    }

    pub fn reader_unlock(&self) {
        self.inner.reader_unlock();
    }

    pub fn writer_lock(&self) {
        self.inner.writer_lock();
    }

    #[must_use]
    pub fn writer_try_lock(&self) -> bool {
        self.inner.writer_try_lock()
    }

    pub fn writer_unlock(&self) {
        self.inner.writer_unlock();
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        if self.inner.has_active_or_waiting() {
            warn!("RwLock dropped while threads are still active or waiting on it");
        }
    }
}

#[cfg(unix)]
mod backend {
    use super::*;
    use std::cell::UnsafeCell;
    use std::mem::MaybeUninit;
    use std::sync::atomic::{AtomicIsize, Ordering};

    pub struct RwLockImpl {
        hdl: UnsafeCell<libc::pthread_rwlock_t>,
        outstanding: AtomicIsize,
    }

    unsafe impl Send for RwLockImpl {}
    unsafe impl Sync for RwLockImpl {}

    impl RwLockImpl {
        pub fn new() -> Result<Self, Error> {
            let mut raw = MaybeUninit::<libc::pthread_rwlock_t>::uninit();
            let rc = unsafe { libc::pthread_rwlock_init(raw.as_mut_ptr(), std::ptr::null()) };
            if rc != 0 {
                return Err(io_error(rc, "pthread_rwlock_init failed"));
            }
            Ok(RwLockImpl {
                hdl: UnsafeCell::new(unsafe { raw.assume_init() }),
                outstanding: AtomicIsize::new(0),
            })
        }

        pub fn reader_lock(&self) {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            let rc = unsafe { libc::pthread_rwlock_rdlock(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_rwlock_rdlock failed: {rc}");
        }

        pub fn reader_try_lock(&self) -> bool {
            if unsafe { libc::pthread_rwlock_tryrdlock(self.hdl.get()) } == 0 {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }

        pub fn reader_unlock(&self) {
            let rc = unsafe { libc::pthread_rwlock_unlock(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_rwlock_unlock failed: {rc}");
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn writer_lock(&self) {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            let rc = unsafe { libc::pthread_rwlock_wrlock(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_rwlock_wrlock failed: {rc}");
        }

        pub fn writer_try_lock(&self) -> bool {
            if unsafe { libc::pthread_rwlock_trywrlock(self.hdl.get()) } == 0 {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }

        pub fn writer_unlock(&self) {
            let rc = unsafe { libc::pthread_rwlock_unlock(self.hdl.get()) };
            debug_assert_eq!(rc, 0, "pthread_rwlock_unlock failed: {rc}");
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn has_active_or_waiting(&self) -> bool {
            self.outstanding.load(Ordering::SeqCst) > 0
        }
    }

    impl Drop for RwLockImpl {
        fn drop(&mut self) {
            unsafe {
                libc::pthread_rwlock_destroy(self.hdl.get());
            }
        }
    }
}

#[cfg(windows)]
mod backend {
    use super::*;
    use std::cell::UnsafeCell;
    use std::sync::atomic::{AtomicIsize, Ordering};
    use windows_sys::Win32::System::Threading::{
        AcquireSRWLockExclusive, AcquireSRWLockShared, ReleaseSRWLockExclusive,
        ReleaseSRWLockShared, TryAcquireSRWLockExclusive, TryAcquireSRWLockShared, SRWLOCK,
        SRWLOCK_INIT,
    };

    pub struct RwLockImpl {
        hdl: UnsafeCell<SRWLOCK>,
        outstanding: AtomicIsize,
    }

    unsafe impl Send for RwLockImpl {}
    unsafe impl Sync for RwLockImpl {}

    impl RwLockImpl {
        pub fn new() -> Result<Self, Error> {
            Ok(RwLockImpl {
                hdl: UnsafeCell::new(SRWLOCK_INIT),
                outstanding: AtomicIsize::new(0),
            })
        }

        pub fn reader_lock(&self) {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            unsafe { AcquireSRWLockShared(self.hdl.get()) };
        }

        pub fn reader_try_lock(&self) -> bool {
            if unsafe { TryAcquireSRWLockShared(self.hdl.get()) } != 0 {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }

        pub fn reader_unlock(&self) {
            unsafe { ReleaseSRWLockShared(self.hdl.get()) };
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn writer_lock(&self) {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            unsafe { AcquireSRWLockExclusive(self.hdl.get()) };
        }

        pub fn writer_try_lock(&self) -> bool {
            if unsafe { TryAcquireSRWLockExclusive(self.hdl.get()) } != 0 {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }

        pub fn writer_unlock(&self) {
            unsafe { ReleaseSRWLockExclusive(self.hdl.get()) };
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn has_active_or_waiting(&self) -> bool {
            self.outstanding.load(Ordering::SeqCst) > 0
        }
    }
}

/// Generic backend: a mutex + two condition variables guarding plain
/// packed reader/writer counters, used on hosts with no native rwlock and
/// on pre-Vista Windows. Writer-preference, matching the native backends.
#[cfg(not(any(unix, windows)))]
mod backend {
    use super::*;
    use crate::condvar::Condvar;
    use crate::mutex::Mutex;
    use std::cell::UnsafeCell;

    struct State {
        active_readers: u32,
        active_writer: bool,
        waiting_readers: u32,
        waiting_writers: u32,
    }

    pub struct RwLockImpl {
        guard: Mutex,
        read_cv: Condvar,
        write_cv: Condvar,
        state: UnsafeCell<State>,
    }

    unsafe impl Send for RwLockImpl {}
    unsafe impl Sync for RwLockImpl {}

    impl RwLockImpl {
        pub fn new() -> Result<Self, Error> {
            Ok(RwLockImpl {
                guard: Mutex::new()?,
                read_cv: Condvar::new()?,
                write_cv: Condvar::new()?,
                state: UnsafeCell::new(State {
                    active_readers: 0,
                    active_writer: false,
                    waiting_readers: 0,
                    waiting_writers: 0,
                }),
            })
        }

        /// Every call site holds `self.guard` for the duration of the
        /// closure, so this is the only place that touches `state`.
        fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
            f(unsafe { &mut *self.state.get() })
        }

        pub fn reader_lock(&self) {
            self.guard.lock();
            let must_wait = self.with_state(|s| s.active_writer);
            if must_wait {
                self.with_state(|s| s.waiting_readers += 1);
                while self.with_state(|s| s.active_writer) {
                    self.read_cv.wait(&self.guard);
                }
                self.with_state(|s| s.waiting_readers -= 1);
            }
            self.with_state(|s| s.active_readers += 1);
            self.guard.unlock();
        }

        pub fn reader_try_lock(&self) -> bool {
            self.guard.lock();
            let ok = self.with_state(|s| {
                if s.active_writer {
                    false
                } else {
                    s.active_readers += 1;
                    true
                }
            });
            self.guard.unlock();
            ok
        }

        pub fn reader_unlock(&self) {
            self.guard.lock();
            let signal_writer = self.with_state(|s| {
                if s.active_readers == 0 {
                    return false;
                }
                s.active_readers -= 1;
                s.active_readers == 0 && s.waiting_writers > 0
            });
            if signal_writer {
                self.write_cv.signal();
            }
            self.guard.unlock();
        }

        pub fn writer_lock(&self) {
            self.guard.lock();
            let must_wait = self.with_state(|s| s.active_writer || s.active_readers > 0);
            if must_wait {
                self.with_state(|s| s.waiting_writers += 1);
                while self.with_state(|s| s.active_writer || s.active_readers > 0) {
                    self.write_cv.wait(&self.guard);
                }
                self.with_state(|s| s.waiting_writers -= 1);
            }
            self.with_state(|s| s.active_writer = true);
            self.guard.unlock();
        }

        pub fn writer_try_lock(&self) -> bool {
            self.guard.lock();
            let ok = self.with_state(|s| {
                if s.active_writer || s.active_readers > 0 {
                    false
                } else {
                    s.active_writer = true;
                    true
                }
            });
            self.guard.unlock();
            ok
        }

        pub fn writer_unlock(&self) {
            self.guard.lock();
            self.with_state(|s| s.active_writer = false);
            let (wake_writer, wake_readers) = self.with_state(|s| {
                (s.waiting_writers > 0, s.waiting_writers == 0 && s.waiting_readers > 0)
            });
            if wake_writer {
                self.write_cv.signal();
            } else if wake_readers {
                self.read_cv.broadcast();
            }
            self.guard.unlock();
        }

        pub fn has_active_or_waiting(&self) -> bool {
            self.with_state(|s| {
                s.active_readers > 0
                    || s.active_writer
                    || s.waiting_readers > 0
                    || s.waiting_writers > 0
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_multiple_readers() {
        let lock = Arc::new(RwLock::new().unwrap());
        lock.reader_lock();
        assert!(lock.reader_try_lock());
        lock.reader_unlock();
        lock.reader_unlock();
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = RwLock::new().unwrap();
        lock.writer_lock();
        assert!(!lock.reader_try_lock());
        assert!(!lock.writer_try_lock());
        lock.writer_unlock();
        assert!(lock.reader_try_lock());
        lock.reader_unlock();
    }

    // RW-1: never both an active writer and active_readers > 0 at once.
    #[test]
    fn test_rw_1_mutual_exclusion_of_writer_and_readers() {
        let lock = Arc::new(RwLock::new().unwrap());
        let active_readers = Arc::new(AtomicIsize::new(0));
        let writer_active = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let active_readers = Arc::clone(&active_readers);
            let writer_active = Arc::clone(&writer_active);
            let violations = Arc::clone(&violations);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    lock.reader_lock();
                    active_readers.fetch_add(1, Ordering::SeqCst);
                    if writer_active.load(Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    active_readers.fetch_sub(1, Ordering::SeqCst);
                    lock.reader_unlock();
                }
            }));
        }
        {
            let lock = Arc::clone(&lock);
            let active_readers = Arc::clone(&active_readers);
            let writer_active = Arc::clone(&writer_active);
            let violations = Arc::clone(&violations);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    lock.writer_lock();
                    writer_active.store(true, Ordering::SeqCst);
                    if active_readers.load(Ordering::SeqCst) > 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    writer_active.store(false, Ordering::SeqCst);
                    lock.writer_unlock();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    // RW-2: a waiting writer makes progress within a bounded number of
    // reader acquire/release cycles.
    #[test]
    fn test_rw_2_writer_preference_bounded_wait() {
        let lock = Arc::new(RwLock::new().unwrap());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        lock.reader_lock();
                        thread::yield_now();
                        lock.reader_unlock();
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        lock.writer_lock();
        lock.writer_unlock();
        stop.store(true, Ordering::SeqCst);

        for r in readers {
            r.join().unwrap();
        }
    }
}
