//! Lock-free atomic primitives (spec C2).
//!
//! [`AtomicInt`] wraps a machine-word signed integer cell; [`AtomicPtrCell`]
//! wraps a pointer-width cell. Both are plain value types the caller embeds
//! directly — the API never allocates the cell itself, only operates on a
//! `&self` reference to one the caller already owns.
//!
//! All operations are sequentially consistent. On targets with native
//! word-sized atomics this compiles to real CAS/LL-SC/hardware atomics; on
//! targets without one (or when the `simulated-atomics` feature is forced),
//! every operation is instead serialized through a single process-global
//! mutex, matching the historical "simulated atomics" backend. [`is_lock_free`]
//! reports which backend is active so callers relying on forward-progress
//! guarantees can detect a degraded build.

#[cfg(any(feature = "simulated-atomics", not(target_has_atomic = "ptr")))]
mod backend {
    use std::cell::UnsafeCell;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static GLOBAL_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn lock() -> MutexGuard<'static, ()> {
        GLOBAL_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One-time initialization. The simulated backend's lock is lazily
    /// created on first use regardless, but eagerly touching it here avoids
    /// paying that cost inside the first real critical section.
    pub fn thread_init() {
        let _ = GLOBAL_LOCK.get_or_init(|| Mutex::new(()));
    }

    /// No teardown is required: the global lock is a `OnceLock` and is
    /// simply leaked for the process lifetime.
    pub fn thread_shutdown() {}

    pub const IS_LOCK_FREE: bool = false;

    pub struct AtomicInt(UnsafeCell<isize>);

    // SAFETY: every access to the inner cell is taken under `GLOBAL_LOCK`.
    unsafe impl Sync for AtomicInt {}
    unsafe impl Send for AtomicInt {}

    impl AtomicInt {
        #[must_use]
        pub const fn new(value: isize) -> Self {
            AtomicInt(UnsafeCell::new(value))
        }

        pub fn get(&self) -> isize {
            let _guard = lock();
            unsafe { *self.0.get() }
        }

        pub fn set(&self, value: isize) {
            let _guard = lock();
            unsafe { *self.0.get() = value };
        }

        pub fn inc(&self) {
            let _guard = lock();
            unsafe { *self.0.get() = (*self.0.get()).wrapping_add(1) };
        }

        pub fn dec_and_test(&self) -> bool {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                *self.0.get() = prev.wrapping_sub(1);
                prev == 1
            }
        }

        pub fn add(&self, value: isize) -> isize {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                *self.0.get() = prev.wrapping_add(value);
                prev
            }
        }

        pub fn compare_and_exchange(&self, old: isize, new: isize) -> bool {
            let _guard = lock();
            unsafe {
                if *self.0.get() == old {
                    *self.0.get() = new;
                    true
                } else {
                    false
                }
            }
        }

        pub fn and(&self, mask: isize) -> isize {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                *self.0.get() = prev & mask;
                prev
            }
        }

        pub fn or(&self, mask: isize) -> isize {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                *self.0.get() = prev | mask;
                prev
            }
        }

        pub fn xor(&self, mask: isize) -> isize {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                *self.0.get() = prev ^ mask;
                prev
            }
        }
    }

    pub struct AtomicPtrCell<T>(UnsafeCell<*mut T>);

    unsafe impl<T> Sync for AtomicPtrCell<T> {}
    unsafe impl<T> Send for AtomicPtrCell<T> {}

    impl<T> AtomicPtrCell<T> {
        #[must_use]
        pub const fn new(value: *mut T) -> Self {
            AtomicPtrCell(UnsafeCell::new(value))
        }

        pub fn get(&self) -> *mut T {
            let _guard = lock();
            unsafe { *self.0.get() }
        }

        pub fn set(&self, value: *mut T) {
            let _guard = lock();
            unsafe { *self.0.get() = value };
        }

        pub fn compare_and_exchange(&self, old: *mut T, new: *mut T) -> bool {
            let _guard = lock();
            unsafe {
                if *self.0.get() == old {
                    *self.0.get() = new;
                    true
                } else {
                    false
                }
            }
        }

        pub fn add(&self, value: isize) -> *mut T {
            let _guard = lock();
            unsafe {
                let prev = *self.0.get();
                let next = (prev as isize).wrapping_add(value) as *mut T;
                *self.0.get() = next;
                prev
            }
        }
    }
}

#[cfg(not(any(feature = "simulated-atomics", not(target_has_atomic = "ptr"))))]
mod backend {
    use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

    pub fn thread_init() {}
    pub fn thread_shutdown() {}

    pub const IS_LOCK_FREE: bool = true;

    pub struct AtomicInt(AtomicIsize);

    impl AtomicInt {
        #[must_use]
        pub const fn new(value: isize) -> Self {
            AtomicInt(AtomicIsize::new(value))
        }

        pub fn get(&self) -> isize {
            self.0.load(Ordering::SeqCst)
        }

        pub fn set(&self, value: isize) {
            self.0.store(value, Ordering::SeqCst);
        }

        pub fn inc(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        pub fn dec_and_test(&self) -> bool {
            self.0.fetch_sub(1, Ordering::SeqCst) == 1
        }

        pub fn add(&self, value: isize) -> isize {
            self.0.fetch_add(value, Ordering::SeqCst)
        }

        pub fn compare_and_exchange(&self, old: isize, new: isize) -> bool {
            self.0
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }

        pub fn and(&self, mask: isize) -> isize {
            self.0.fetch_and(mask, Ordering::SeqCst)
        }

        pub fn or(&self, mask: isize) -> isize {
            self.0.fetch_or(mask, Ordering::SeqCst)
        }

        pub fn xor(&self, mask: isize) -> isize {
            self.0.fetch_xor(mask, Ordering::SeqCst)
        }
    }

    pub struct AtomicPtrCell<T>(AtomicPtr<T>);

    impl<T> AtomicPtrCell<T> {
        #[must_use]
        pub const fn new(value: *mut T) -> Self {
            AtomicPtrCell(AtomicPtr::new(value))
        }

        pub fn get(&self) -> *mut T {
            self.0.load(Ordering::SeqCst)
        }

        pub fn set(&self, value: *mut T) {
            self.0.store(value, Ordering::SeqCst);
        }

        pub fn compare_and_exchange(&self, old: *mut T, new: *mut T) -> bool {
            self.0
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }

        pub fn add(&self, value: isize) -> *mut T {
            let mut prev = self.0.load(Ordering::SeqCst);
            loop {
                let next = ((prev as isize).wrapping_add(value)) as *mut T;
                match self
                    .0
                    .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(_) => return prev,
                    Err(actual) => prev = actual,
                }
            }
        }
    }
}

pub use backend::{AtomicInt, AtomicPtrCell};

/// Runs any one-time setup a backing backend requires. No-op on the native
/// atomics backend; eagerly creates the global lock on the simulated one.
pub fn thread_init() {
    backend::thread_init();
}

/// Runs any one-time teardown a backing backend requires. Presently a no-op
/// on every backend.
pub fn thread_shutdown() {
    backend::thread_shutdown();
}

/// Reports whether the active backend is real lock-free atomics (`true`) or
/// the mutex-simulated fallback (`false`).
#[must_use]
pub fn is_lock_free() -> bool {
    backend::IS_LOCK_FREE
}
