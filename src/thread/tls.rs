//! Thread-local storage keys (spec C7, TLS-1).
//!
//! Slots are not native OS TLS: they live inside each [`super::ThreadInner`]
//! so that an exiting thread, or a global shutdown, can enumerate every key
//! across every still-live thread and run destructors — something real TLS
//! only lets a thread do for itself. `get_local`/`set_local`/`replace_local`
//! always act on the calling thread's own slot map, matching the original
//! per-thread-specific-data contract.

use super::ThreadInner;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// A destructor receives the slot's raw value and must not assume anything
/// about which thread calls it beyond "the thread that owned the slot, or
/// the thread running a shutdown sweep."
pub type Destructor = fn(*mut u8);

/// Bounded per the TLS-1 property: enough passes for a destructor to set
/// the key again a few times without looping forever.
const MAX_DESTRUCTOR_PASSES: u32 = 4;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);
static DESTRUCTORS: OnceLock<Mutex<HashMap<u64, Option<Destructor>>>> = OnceLock::new();

fn destructors() -> &'static Mutex<HashMap<u64, Option<Destructor>>> {
    DESTRUCTORS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A thread-local storage key, allocated once and shared by every thread
/// that wants a slot under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalKey(u64);

/// Allocates a new TLS key. `destructor`, if given, runs on any non-null
/// slot value left behind when the owning thread exits or the runtime
/// shuts down.
pub fn local_new(destructor: Option<Destructor>) -> LocalKey {
    let id = NEXT_KEY.fetch_add(1, Ordering::SeqCst);
    destructors()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .insert(id, destructor);
    LocalKey(id)
}

/// Retires a key. Slots already set under it on live threads are simply
/// never swept again.
pub fn local_free(key: LocalKey) {
    destructors()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&key.0);
}

pub fn get_local(inner: &ThreadInner, key: LocalKey) -> *mut u8 {
    inner
        .local_slots
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(&key.0)
        .copied()
        .unwrap_or(std::ptr::null_mut())
}

pub fn set_local(inner: &ThreadInner, key: LocalKey, value: *mut u8) {
    let mut slots = inner.local_slots.lock().unwrap_or_else(|p| p.into_inner());
    if value.is_null() {
        slots.remove(&key.0);
    } else {
        slots.insert(key.0, value);
    }
}

pub fn replace_local(inner: &ThreadInner, key: LocalKey, value: *mut u8) -> *mut u8 {
    let mut slots = inner.local_slots.lock().unwrap_or_else(|p| p.into_inner());
    let prev = slots.get(&key.0).copied().unwrap_or(std::ptr::null_mut());
    if value.is_null() {
        slots.remove(&key.0);
    } else {
        slots.insert(key.0, value);
    }
    prev
}

/// Runs the bounded destructor sweep over one thread's slots. Called both
/// from that thread's own exit path and, for threads that never got to run
/// it, from a global shutdown sweep.
pub(super) fn run_destructors_for(inner: &ThreadInner) {
    for _ in 0..MAX_DESTRUCTOR_PASSES {
        let pending: Vec<(u64, *mut u8)> = {
            let mut slots = inner.local_slots.lock().unwrap_or_else(|p| p.into_inner());
            let keys: Vec<u64> = slots
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter()
                .filter_map(|k| slots.remove(&k).map(|v| (k, v)))
                .collect()
        };

        if pending.is_empty() {
            return;
        }

        let dtors = destructors().lock().unwrap_or_else(|p| p.into_inner());
        let mut ran_any = false;
        for (key_id, value) in pending {
            if let Some(Some(dtor)) = dtors.get(&key_id) {
                dtor(value);
                ran_any = true;
            }
        }
        drop(dtors);

        if !ran_any {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    fn record_destructor(_value: *mut u8) {
        DESTROYED.fetch_add(1, AtomicOrdering::SeqCst);
    }

    // TLS-1: a non-null slot with a destructor is cleared and the
    // destructor runs exactly once by the time the owning thread exits.
    #[test]
    fn test_tls_1_destructor_runs_on_thread_exit() {
        DESTROYED.store(0, AtomicOrdering::SeqCst);
        let key = Arc::new(local_new(Some(record_destructor)));

        let handle = {
            let key = Arc::clone(&key);
            thread::create(
                move || {
                    let mut boxed = Box::new(7u8);
                    thread::set_local(*key, &mut *boxed as *mut u8);
                    std::mem::forget(boxed);
                },
                true,
            )
            .unwrap()
        };
        handle.join();

        assert_eq!(DESTROYED.load(AtomicOrdering::SeqCst), 1);
        local_free(*key);
    }

    #[test]
    fn test_get_set_replace_roundtrip() {
        let key = local_new(None);
        let mut a = 1u8;
        let mut b = 2u8;
        assert!(thread::get_local(key).is_null());
        thread::set_local(key, &mut a as *mut u8);
        assert_eq!(thread::get_local(key), &mut a as *mut u8);
        let prev = thread::replace_local(key, &mut b as *mut u8);
        assert_eq!(prev, &mut a as *mut u8);
        assert_eq!(thread::get_local(key), &mut b as *mut u8);
        local_free(key);
    }
}
