//! Scenario 1: two threads incrementing a shared counter 1,000,000 times
//! each, verified against the public [`syskit::AtomicInt`] surface only.

use std::sync::Arc;
use syskit::AtomicInt;

#[test]
fn two_threads_million_increments_each_sum_to_two_million() {
    let counter = Arc::new(AtomicInt::new(0));
    let iterations = 1_000_000;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                for _ in 0..iterations {
                    counter.inc();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.get(), 2_000_000);
}

#[test]
fn dec_and_test_fires_exactly_once_at_zero_transition() {
    let counter = Arc::new(AtomicInt::new(0));
    let transitions_to_zero = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let threads = 8;
    let per_thread = 10_000;

    for _ in 0..threads * per_thread {
        counter.inc();
    }

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let transitions_to_zero = Arc::clone(&transitions_to_zero);
            std::thread::spawn(move || {
                for _ in 0..per_thread {
                    if counter.dec_and_test() {
                        transitions_to_zero.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.get(), 0);
    assert_eq!(
        transitions_to_zero.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}
