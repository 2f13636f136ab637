//! Scenario 3: 8 readers and 1 writer on a shared rwlock; readers must
//! never observe a torn write of the writer's 128-byte payload.

use std::sync::Arc;
use syskit::RwLock;

const PATTERN: u8 = 0xAB;
const PAYLOAD_LEN: usize = 128;

struct Shared {
    lock: RwLock,
    payload: std::cell::UnsafeCell<[u8; PAYLOAD_LEN]>,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

#[test]
fn readers_never_observe_a_torn_write() {
    let shared = Arc::new(Shared {
        lock: RwLock::new().unwrap(),
        payload: std::cell::UnsafeCell::new([0u8; PAYLOAD_LEN]),
    });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let shared = Arc::clone(&shared);
        handles.push(std::thread::spawn(move || {
            shared.lock.reader_lock();
            let snapshot = unsafe { *shared.payload.get() };
            shared.lock.reader_unlock();

            let all_zero = snapshot.iter().all(|&b| b == 0);
            let all_pattern = snapshot.iter().all(|&b| b == PATTERN);
            assert!(
                all_zero || all_pattern,
                "reader observed a torn write: {:?}",
                &snapshot[..8]
            );

            std::thread::sleep(std::time::Duration::from_millis(1));
        }));
    }

    {
        let shared = Arc::clone(&shared);
        handles.push(std::thread::spawn(move || {
            shared.lock.writer_lock();
            unsafe {
                *shared.payload.get() = [PATTERN; PAYLOAD_LEN];
            }
            shared.lock.writer_unlock();
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let final_snapshot = unsafe { *shared.payload.get() };
    assert!(final_snapshot.iter().all(|&b| b == PATTERN));
}
