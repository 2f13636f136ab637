//! Scenario 5: a profiler measuring a 100 ms host-clock busy loop reports
//! elapsed microseconds within the documented bound.

use std::time::{Duration, Instant};
use syskit::TimeProfiler;

#[test]
fn hundred_millisecond_busy_loop_falls_within_bound() {
    let p = TimeProfiler::new();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(100) {
        std::hint::spin_loop();
    }
    let usecs = p.elapsed_usecs();
    assert!(usecs >= 95_000, "elapsed too small: {usecs}");
    assert!(usecs <= 150_000, "elapsed too large: {usecs}");
}
