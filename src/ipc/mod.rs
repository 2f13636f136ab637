//! Inter-process communication: named semaphores and shared memory,
//! and the platform key derivation shared by both (spec C8-C10).

pub mod key;
pub mod semaphore;
pub mod shm;

pub use key::KeyFileState;
pub use semaphore::{AccessMode as SemaphoreAccessMode, Semaphore};
pub use shm::{AccessPerms as ShmAccessPerms, Shm};
