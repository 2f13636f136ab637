//! Thread runtime (spec C7).
//!
//! [`Thread`] is a reference-counted handle, mirroring the original's
//! `ref`/`unref` pair on top of an `Arc`: [`Thread::ref_clone`] shares the
//! same underlying thread, [`Thread::unref`] drops a reference. A thread
//! created through [`create`]/[`create_full`] is "ours" and may be joined;
//! [`current`] called from a thread this runtime did not spawn returns an
//! "adopted" handle of its own that cannot be joined.

pub mod tls;

use crate::error::Error;
use log::warn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

pub use tls::{local_free, local_new, Destructor, LocalKey};

/// Abstract, host-independent thread priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Inherit,
    Idle,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    TimeCritical,
}

pub(crate) struct ThreadInner {
    pub(crate) ours: bool,
    joinable: bool,
    exit_code: AtomicI32,
    join_state: Mutex<Option<backend::RawJoinHandle>>,
    pub(crate) local_slots: Mutex<HashMap<u64, *mut u8>>,
}

unsafe impl Send for ThreadInner {}
unsafe impl Sync for ThreadInner {}

impl ThreadInner {
    fn adopted() -> Self {
        ThreadInner {
            ours: false,
            joinable: false,
            exit_code: AtomicI32::new(0),
            join_state: Mutex::new(None),
            local_slots: Mutex::new(HashMap::new()),
        }
    }
}

/// A handle to a thread, created by this runtime or adopted on first
/// contact with a foreign one.
pub struct Thread(Arc<ThreadInner>);

impl Thread {
    /// Takes another reference to the same thread, the way `p_uthread_ref`
    /// bumps a C refcount.
    #[must_use]
    pub fn ref_clone(&self) -> Thread {
        Thread(Arc::clone(&self.0))
    }

    /// Drops this reference. Purely documentation of intent over letting
    /// the handle go out of scope — kept as an explicit call because the
    /// original API names it.
    pub fn unref(self) {}

    /// Blocks until the thread's entry routine returns or calls
    /// [`exit`], then returns the code it exited with. Returns `None` for
    /// an adopted handle, a non-joinable handle, or a handle already
    /// joined once (double-join is undefined; this runtime treats the
    /// second call as a no-op rather than blocking forever).
    pub fn join(&self) -> Option<i32> {
        if !self.0.ours || !self.0.joinable {
            return None;
        }
        let handle = self.0.join_state.lock().unwrap_or_else(|p| p.into_inner()).take();
        handle.map(|h| {
            backend::join(h);
            self.0.exit_code.load(Ordering::SeqCst)
        })
    }

    /// Changes this thread's scheduling priority. Returns `false` if the
    /// host exposes no priority mechanism for the calling context; the
    /// call then has no effect.
    pub fn set_priority(&self, priority: Priority) -> bool {
        if priority == Priority::Inherit {
            return true;
        }
        let guard = self.0.join_state.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(handle) => backend::set_priority(handle, priority),
            None => false,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

static REGISTRY: OnceLock<Mutex<Vec<Weak<ThreadInner>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<Weak<ThreadInner>>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

fn register(inner: &Arc<ThreadInner>) {
    registry()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .push(Arc::downgrade(inner));
}

/// Returns the handle for the calling thread, adopting it (refcount 1,
/// `ours = false`) the first time it is seen if it wasn't created by
/// [`create`]/[`create_full`].
#[must_use]
pub fn current() -> Thread {
    CURRENT.with(|cell| {
        if let Some(existing) = cell.borrow().as_ref() {
            return existing.ref_clone();
        }
        let inner = Arc::new(ThreadInner::adopted());
        register(&inner);
        let handle = Thread(inner);
        *cell.borrow_mut() = Some(handle.ref_clone());
        handle
    })
}

/// Signals that the current call stack unwound because of [`exit`], not a
/// real panic. Caught by the entry-point trampoline in [`create_full`].
struct ExitSignal;

/// Terminates the calling thread immediately, running TLS destructors
/// first. Called from a thread this runtime did not create, it logs a
/// warning and returns instead of terminating anything.
pub fn exit(code: i32) {
    let cur = current();
    if !cur.0.ours {
        warn!("thread::exit called from a thread not created by this runtime; ignoring");
        return;
    }
    cur.0.exit_code.store(code, Ordering::SeqCst);
    std::panic::panic_any(ExitSignal);
}

/// Asks the scheduler to deschedule the caller for one quantum.
pub fn yield_now() {
    backend::yield_now();
}

/// Blocks the caller for at least `msec` milliseconds.
pub fn sleep(msec: u32) {
    std::thread::sleep(std::time::Duration::from_millis(u64::from(msec)));
}

/// Number of logical CPUs, or 1 if the host query fails.
#[must_use]
pub fn ideal_count() -> i32 {
    backend::ideal_count()
}

/// Spawns `func` with the default (inherited) priority and default stack
/// size.
pub fn create(func: impl FnOnce() + Send + 'static, joinable: bool) -> Result<Thread, Error> {
    create_full(func, joinable, Priority::Inherit, 0)
}

/// Spawns `func` on a new OS thread with explicit priority and stack size
/// (`0` meaning "host default").
pub fn create_full(
    func: impl FnOnce() + Send + 'static,
    joinable: bool,
    priority: Priority,
    stack_size: usize,
) -> Result<Thread, Error> {
    let inner = Arc::new(ThreadInner {
        ours: true,
        joinable,
        exit_code: AtomicI32::new(0),
        join_state: Mutex::new(None),
        local_slots: Mutex::new(HashMap::new()),
    });
    register(&inner);

    let entry_inner = Arc::clone(&inner);
    let trampoline: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
        CURRENT.with(|cell| *cell.borrow_mut() = Some(Thread(Arc::clone(&entry_inner))));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(func));
        tls::run_destructors_for(&entry_inner);
        if let Err(payload) = outcome {
            if payload.downcast_ref::<ExitSignal>().is_none() {
                std::panic::resume_unwind(payload);
            }
        }
    });

    let raw = backend::spawn(trampoline, joinable, stack_size)?;
    if !matches!(priority, Priority::Inherit) {
        backend::set_priority(&raw, priority);
    }
    *inner.join_state.lock().unwrap_or_else(|p| p.into_inner()) = Some(raw);

    Ok(Thread(inner))
}

/// Sweeps TLS destructors across every still-live thread handle this
/// runtime knows about — including adopted ones whose OS thread exited
/// without going through [`exit`] or a `create`d entry point.
pub fn shutdown() {
    let reg = registry().lock().unwrap_or_else(|p| p.into_inner());
    for weak in reg.iter() {
        if let Some(inner) = weak.upgrade() {
            tls::run_destructors_for(&inner);
        }
    }
}

pub fn get_local(key: LocalKey) -> *mut u8 {
    tls::get_local(&current().0, key)
}

pub fn set_local(key: LocalKey, value: *mut u8) {
    tls::set_local(&current().0, key, value);
}

pub fn replace_local(key: LocalKey, value: *mut u8) -> *mut u8 {
    tls::replace_local(&current().0, key, value)
}

#[cfg(unix)]
mod backend {
    use super::Priority;
    use crate::error::io_error;
    use crate::error::Error;
    use std::os::raw::c_void;

    pub struct RawJoinHandle(libc::pthread_t);

    unsafe impl Send for RawJoinHandle {}

    extern "C" fn trampoline(arg: *mut c_void) -> *mut c_void {
        let closure =
            unsafe { Box::from_raw(arg as *mut Box<dyn FnOnce() + Send + 'static>) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (*closure)()));
        if result.is_err() {
            std::process::abort();
        }
        std::ptr::null_mut()
    }

    pub fn spawn(
        func: Box<dyn FnOnce() + Send + 'static>,
        joinable: bool,
        stack_size: usize,
    ) -> Result<RawJoinHandle, Error> {
        unsafe {
            let mut attr: libc::pthread_attr_t = std::mem::zeroed();
            if libc::pthread_attr_init(&mut attr) != 0 {
                return Err(io_error(crate::error::get_last_system(), "pthread_attr_init failed"));
            }
            let detach_state = if joinable {
                libc::PTHREAD_CREATE_JOINABLE
            } else {
                libc::PTHREAD_CREATE_DETACHED
            };
            libc::pthread_attr_setdetachstate(&mut attr, detach_state);
            if stack_size > 0 {
                libc::pthread_attr_setstacksize(&mut attr, stack_size);
            }

            let boxed_twice: Box<Box<dyn FnOnce() + Send + 'static>> = Box::new(func);
            let arg = Box::into_raw(boxed_twice) as *mut c_void;

            let mut tid: libc::pthread_t = std::mem::zeroed();
            let rc = libc::pthread_create(&mut tid, &attr, trampoline, arg);
            libc::pthread_attr_destroy(&mut attr);

            if rc != 0 {
                drop(Box::from_raw(arg as *mut Box<dyn FnOnce() + Send + 'static>));
                return Err(io_error(rc, "pthread_create failed"));
            }

            Ok(RawJoinHandle(tid))
        }
    }

    pub fn join(handle: RawJoinHandle) {
        unsafe {
            let mut ret: *mut c_void = std::ptr::null_mut();
            libc::pthread_join(handle.0, &mut ret);
        }
    }

    /// Linear map from the abstract priority range onto whatever range the
    /// thread's current scheduling policy supports, the same formula the
    /// Solaris backend uses for `thr_setprio`. Returns `false` (without
    /// effect) if the policy reports no usable range, matching hosts with
    /// no real priority mechanism for unprivileged threads.
    pub fn set_priority(handle: &RawJoinHandle, priority: Priority) -> bool {
        unsafe {
            let mut policy: i32 = 0;
            let mut param: libc::sched_param = std::mem::zeroed();
            if libc::pthread_getschedparam(handle.0, &mut policy, &mut param) != 0 {
                return false;
            }

            let min = libc::sched_get_priority_min(policy);
            let max = libc::sched_get_priority_max(policy);
            if min < 0 || max < 0 || min == max {
                return false;
            }

            let low_bound = Priority::Idle as i32;
            let upper_bound = Priority::TimeCritical as i32;
            let mapped = (priority as i32 - low_bound) * (max - min) / upper_bound + min;

            param.sched_priority = mapped;
            libc::pthread_setschedparam(handle.0, policy, &param) == 0
        }
    }

    pub fn yield_now() {
        unsafe {
            libc::sched_yield();
        }
    }

    pub fn ideal_count() -> i32 {
        let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if cores < 1 {
            1
        } else {
            cores as i32
        }
    }
}

#[cfg(windows)]
mod backend {
    use super::Priority;
    use crate::error::{io_error, Error};
    use std::os::raw::c_void;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;
    use windows_sys::Win32::System::Threading::{
        CreateThread, SetThreadPriority, WaitForSingleObject, INFINITE, THREAD_PRIORITY_ABOVE_NORMAL,
        THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST, THREAD_PRIORITY_IDLE,
        THREAD_PRIORITY_LOWEST, THREAD_PRIORITY_NORMAL, THREAD_PRIORITY_TIME_CRITICAL,
    };

    pub struct RawJoinHandle(HANDLE);

    unsafe impl Send for RawJoinHandle {}

    unsafe extern "system" fn trampoline(arg: *mut c_void) -> u32 {
        let closure =
            unsafe { Box::from_raw(arg as *mut Box<dyn FnOnce() + Send + 'static>) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (*closure)()));
        if result.is_err() {
            std::process::abort();
        }
        0
    }

    pub fn spawn(
        func: Box<dyn FnOnce() + Send + 'static>,
        joinable: bool,
        stack_size: usize,
    ) -> Result<RawJoinHandle, Error> {
        let boxed_twice: Box<Box<dyn FnOnce() + Send + 'static>> = Box::new(func);
        let arg = Box::into_raw(boxed_twice) as *mut c_void;

        let handle = unsafe {
            CreateThread(
                std::ptr::null(),
                stack_size,
                Some(trampoline),
                arg,
                0,
                std::ptr::null_mut(),
            )
        };

        if handle.is_null() {
            unsafe {
                drop(Box::from_raw(arg as *mut Box<dyn FnOnce() + Send + 'static>));
            }
            return Err(io_error(crate::error::get_last_system(), "CreateThread failed"));
        }

        // A detached thread on Windows still owns a HANDLE; nothing else
        // will ever call CloseHandle on it, so do it now.
        if !joinable {
            unsafe {
                CloseHandle(handle);
            }
        }

        Ok(RawJoinHandle(handle))
    }

    pub fn join(handle: RawJoinHandle) {
        unsafe {
            WaitForSingleObject(handle.0, INFINITE);
            CloseHandle(handle.0);
        }
        let _ = WAIT_OBJECT_0;
    }

    pub fn set_priority(handle: &RawJoinHandle, priority: Priority) -> bool {
        let native = match priority {
            Priority::Inherit => return true,
            Priority::Idle => THREAD_PRIORITY_IDLE,
            Priority::Lowest => THREAD_PRIORITY_LOWEST,
            Priority::Low => THREAD_PRIORITY_BELOW_NORMAL,
            Priority::Normal => THREAD_PRIORITY_NORMAL,
            Priority::High => THREAD_PRIORITY_ABOVE_NORMAL,
            Priority::Highest => THREAD_PRIORITY_HIGHEST,
            Priority::TimeCritical => THREAD_PRIORITY_TIME_CRITICAL,
        };
        unsafe { SetThreadPriority(handle.0, native) != 0 }
    }

    pub fn yield_now() {
        std::thread::yield_now();
    }

    pub fn ideal_count() -> i32 {
        unsafe {
            let mut info = std::mem::zeroed();
            GetSystemInfo(&mut info);
            let n = info.dwNumberOfProcessors;
            if n < 1 {
                1
            } else {
                n as i32
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod backend {
    use super::Priority;
    use crate::error::Error;

    pub struct RawJoinHandle(std::thread::JoinHandle<()>);

    pub fn spawn(
        func: Box<dyn FnOnce() + Send + 'static>,
        _joinable: bool,
        stack_size: usize,
    ) -> Result<RawJoinHandle, Error> {
        let mut builder = std::thread::Builder::new();
        if stack_size > 0 {
            builder = builder.stack_size(stack_size);
        }
        builder
            .spawn(func)
            .map(RawJoinHandle)
            .map_err(|e| crate::error::io_error(e.raw_os_error().unwrap_or(0), "thread spawn failed"))
    }

    pub fn join(handle: RawJoinHandle) {
        let _ = handle.0.join();
    }

    /// No portable priority mechanism without a native backend; matches
    /// the documented fallback for hosts that offer none.
    pub fn set_priority(_handle: &RawJoinHandle, _priority: Priority) -> bool {
        false
    }

    pub fn yield_now() {
        std::thread::yield_now();
    }

    pub fn ideal_count() -> i32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn test_create_join_returns_exit_code() {
        let t = create(
            || {
                exit(42);
            },
            true,
        )
        .unwrap();
        assert_eq!(t.join(), Some(42));
    }

    #[test]
    fn test_normal_return_exit_code_zero() {
        let t = create(|| {}, true).unwrap();
        assert_eq!(t.join(), Some(0));
    }

    #[test]
    fn test_non_joinable_join_returns_none() {
        let t = create(|| {}, false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(t.join(), None);
    }

    // THR-1: every spawned thread's entry routine runs to completion (or
    // calls exit) exactly once, observed via a shared counter.
    #[test]
    fn test_thr_1_all_threads_run_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                create(
                    move || {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    },
                    true,
                )
                .unwrap()
            })
            .collect();

        for h in handles {
            h.join();
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 8);
    }

    #[test]
    fn test_ideal_count_at_least_one() {
        assert!(ideal_count() >= 1);
    }

    #[test]
    fn test_ref_clone_and_unref() {
        let t = create(|| {}, true).unwrap();
        let t2 = t.ref_clone();
        t2.unref();
        t.join();
    }

    #[test]
    fn test_exit_terminates_entry_routine_immediately() {
        let code = Arc::new(AtomicI32::new(-1));
        let t = {
            let code = Arc::clone(&code);
            create(
                move || {
                    let cur = current();
                    assert!(cur.0.ours);
                    exit(0);
                    // never reached
                    code.store(1, AtomicOrdering::SeqCst);
                },
                true,
            )
            .unwrap()
        };
        t.join();
        assert_eq!(code.load(AtomicOrdering::SeqCst), -1);
    }

    // exit() called from a thread this runtime didn't spawn (an adopted
    // handle) is ignored with a warning rather than terminating anything.
    #[test]
    fn test_adopted_thread_exit_is_noop() {
        let reached = Arc::new(AtomicUsize::new(0));
        let handle = {
            let reached = Arc::clone(&reached);
            std::thread::spawn(move || {
                let cur = current();
                assert!(!cur.0.ours);
                exit(99);
                reached.fetch_add(1, AtomicOrdering::SeqCst);
            })
        };
        handle.join().unwrap();
        assert_eq!(reached.load(AtomicOrdering::SeqCst), 1);
    }
}
