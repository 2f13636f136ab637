//! Intra-process mutual exclusion (spec C3).
//!
//! [`Mutex`] is a bare lock: unlike `std::sync::Mutex<T>` it guards no data
//! of its own, because [`crate::condvar::Condvar::wait`] needs to release
//! and reacquire the *same* lock object a caller is already holding around
//! its own data. Recursive acquisition by the thread already holding the
//! lock is undefined behavior on every backend — do not do this, even on
//! the AmigaOS-style backend whose native primitive happens to be
//! recursive.

use crate::error::{io_error, Error};

/// An intra-process mutual-exclusion lock.
pub struct Mutex {
    inner: backend::MutexImpl,
}

impl Mutex {
    /// Creates a new, unlocked mutex.
    pub fn new() -> Result<Self, Error> {
        Ok(Mutex {
            inner: backend::MutexImpl::new()?,
        })
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) {
        self.inner.lock();
    }

    /// Attempts to acquire the lock without blocking. Returns `true` if
    /// acquired.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.inner.try_lock()
    }

    /// Releases the lock. Unlocking a mutex not held by the caller is
    /// undefined behavior.
    pub fn unlock(&self) {
        self.inner.unlock();
    }
}

#[cfg(unix)]
impl Mutex {
    /// Exposes the raw `pthread_mutex_t` so [`crate::condvar::Condvar`] can
    /// pass it straight to `pthread_cond_wait`. Not part of the public API.
    pub(crate) fn as_raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.as_raw()
    }
}

#[cfg(unix)]
mod backend {
    use super::*;
    use std::cell::UnsafeCell;
    use std::mem::MaybeUninit;

    pub struct MutexImpl(UnsafeCell<libc::pthread_mutex_t>);

    unsafe impl Send for MutexImpl {}
    unsafe impl Sync for MutexImpl {}

    impl MutexImpl {
        pub fn new() -> Result<Self, Error> {
            let mut raw = MaybeUninit::<libc::pthread_mutex_t>::uninit();
            let rc = unsafe { libc::pthread_mutex_init(raw.as_mut_ptr(), std::ptr::null()) };
            if rc != 0 {
                return Err(io_error(rc, "pthread_mutex_init failed"));
            }
            Ok(MutexImpl(UnsafeCell::new(unsafe { raw.assume_init() })))
        }

        pub fn lock(&self) {
            let rc = unsafe { libc::pthread_mutex_lock(self.0.get()) };
            debug_assert_eq!(rc, 0, "pthread_mutex_lock failed: {rc}");
        }

        pub fn try_lock(&self) -> bool {
            unsafe { libc::pthread_mutex_trylock(self.0.get()) == 0 }
        }

        pub fn unlock(&self) {
            let rc = unsafe { libc::pthread_mutex_unlock(self.0.get()) };
            debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: {rc}");
        }

        pub fn as_raw(&self) -> *mut libc::pthread_mutex_t {
            self.0.get()
        }
    }

    impl Drop for MutexImpl {
        fn drop(&mut self) {
            unsafe {
                libc::pthread_mutex_destroy(self.0.get());
            }
        }
    }
}

#[cfg(windows)]
mod backend {
    use super::*;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Threading::{
        CreateMutexW, ReleaseMutex, WaitForSingleObject, INFINITE,
    };

    pub struct MutexImpl(HANDLE);

    unsafe impl Send for MutexImpl {}
    unsafe impl Sync for MutexImpl {}

    impl MutexImpl {
        pub fn new() -> Result<Self, Error> {
            let handle = unsafe { CreateMutexW(std::ptr::null(), 0, std::ptr::null()) };
            if handle.is_null() {
                return Err(io_error(
                    crate::error::get_last_system(),
                    "CreateMutexW failed",
                ));
            }
            Ok(MutexImpl(handle))
        }

        pub fn lock(&self) {
            let rc = unsafe { WaitForSingleObject(self.0, INFINITE) };
            debug_assert_eq!(rc, WAIT_OBJECT_0, "WaitForSingleObject failed: {rc}");
        }

        pub fn try_lock(&self) -> bool {
            unsafe { WaitForSingleObject(self.0, 0) == WAIT_OBJECT_0 }
        }

        pub fn unlock(&self) {
            unsafe {
                ReleaseMutex(self.0);
            }
        }
    }

    impl Drop for MutexImpl {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod backend {
    use super::*;
    use std::sync::{Condvar, Mutex as StdMutex};

    /// A generic mutex built from a guarding `Mutex<bool>` + `Condvar`, for
    /// hosts with no native raw-lock primitive available.
    pub struct MutexImpl {
        locked: StdMutex<bool>,
        cv: Condvar,
    }

    impl MutexImpl {
        pub fn new() -> Result<Self, Error> {
            Ok(MutexImpl {
                locked: StdMutex::new(false),
                cv: Condvar::new(),
            })
        }

        pub fn lock(&self) {
            let mut guard = self.locked.lock().unwrap_or_else(|p| p.into_inner());
            while *guard {
                guard = self.cv.wait(guard).unwrap_or_else(|p| p.into_inner());
            }
            *guard = true;
        }

        pub fn try_lock(&self) -> bool {
            let mut guard = self.locked.lock().unwrap_or_else(|p| p.into_inner());
            if *guard {
                false
            } else {
                *guard = true;
                true
            }
        }

        pub fn unlock(&self) {
            let mut guard = self.locked.lock().unwrap_or_else(|p| p.into_inner());
            *guard = false;
            self.cv.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let m = Mutex::new().unwrap();
        m.lock();
        m.unlock();
        m.lock();
        m.unlock();
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let m = Mutex::new().unwrap();
        m.lock();
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    // MX-1: at most one thread returns successfully from `lock` on the same
    // mutex, at any point in time, before it calls `unlock`.
    #[test]
    fn test_mx_1_mutual_exclusion() {
        let mutex = Arc::new(Mutex::new().unwrap());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let in_critical = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let counter = Arc::clone(&counter);
                let in_critical = Arc::clone(&in_critical);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        mutex.lock();
                        let now = in_critical.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                        assert_eq!(now, 1, "more than one thread observed inside the critical section");
                        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        in_critical.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                        mutex.unlock();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 16_000);
    }
}
