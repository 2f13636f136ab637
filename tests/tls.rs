//! Scenario 6: a TLS destructor records the pointer it was given into a
//! process-global list, observable after the owning thread is joined.

use std::sync::{Mutex, OnceLock};
use syskit::thread;

static DESTROYED: OnceLock<Mutex<Vec<usize>>> = OnceLock::new();

fn destroyed() -> &'static Mutex<Vec<usize>> {
    DESTROYED.get_or_init(|| Mutex::new(Vec::new()))
}

fn record_destroyed(ptr: *mut u8) {
    destroyed().lock().unwrap().push(ptr as usize);
}

#[test]
fn destructor_runs_exactly_once_with_the_stored_pointer() {
    let key = thread::local_new(Some(record_destroyed as thread::Destructor));

    let boxed: Box<u32> = Box::new(0xCAFEu32);
    let raw = Box::into_raw(boxed) as *mut u8;
    let expected = raw as usize;

    let handle = thread::create(
        move || {
            thread::set_local(key, raw);
        },
        true,
    )
    .unwrap();
    handle.join();

    let list = destroyed().lock().unwrap();
    assert_eq!(list.iter().filter(|&&p| p == expected).count(), 1);

    // Safe to reclaim now that the destructor (which only records the
    // address, never dereferences it) has run.
    unsafe {
        drop(Box::from_raw(expected as *mut u32));
    }
}
