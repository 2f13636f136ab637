//! Scenario 2: named semaphore handoff between two threads acting as
//! stand-ins for two processes sharing the same logical name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use syskit::ipc::semaphore::AccessMode;
use syskit::Semaphore;

#[test]
fn acquire_release_handoff_within_bounded_time() {
    let name = "syskit-test-handoff-s";
    let sem = Arc::new(Semaphore::new(name, 1, AccessMode::ForceCreateReset).unwrap());

    sem.acquire().unwrap();

    let b_acquired = Arc::new(AtomicBool::new(false));
    let handle = {
        let sem = Arc::clone(&sem);
        let b_acquired = Arc::clone(&b_acquired);
        std::thread::spawn(move || {
            sem.acquire().unwrap();
            b_acquired.store(true, Ordering::SeqCst);
            sem.release().unwrap();
        })
    };

    // B must still be blocked; A hasn't released yet.
    std::thread::sleep(Duration::from_millis(50));
    assert!(!b_acquired.load(Ordering::SeqCst));

    let start = Instant::now();
    sem.release().unwrap();
    handle.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(b_acquired.load(Ordering::SeqCst));
}
