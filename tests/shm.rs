//! Scenario 4: two handles on the same logical shared-memory segment,
//! standing in for two processes opening it by name.

use syskit::ipc::shm::AccessPerms;
use syskit::Shm;

#[test]
fn second_opener_observes_first_openers_write() {
    let name = "syskit-test-shm-handoff";

    let mut p1 = Shm::new(name, 4096, AccessPerms::ReadWrite).unwrap();
    assert_eq!(p1.size(), 4096);

    p1.lock().unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping(b"HELLO".as_ptr(), p1.address(), 5);
    }
    p1.unlock().unwrap();

    {
        let p2 = Shm::new(name, 0, AccessPerms::ReadOnly).unwrap();
        assert_eq!(p2.size(), 4096);
        p2.lock().unwrap();
        let mut buf = [0u8; 5];
        unsafe {
            std::ptr::copy_nonoverlapping(p2.address(), buf.as_mut_ptr(), 5);
        }
        p2.unlock().unwrap();
        assert_eq!(&buf, b"HELLO");
    }

    p1.take_ownership();
    drop(p1);
}
