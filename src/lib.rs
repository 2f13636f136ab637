//! # syskit
//!
//! A portable concurrency and IPC runtime: atomics, mutual exclusion,
//! condition variables, reader-writer locks, spinlocks, user threads with
//! thread-local storage and priorities, named system semaphores, named
//! shared memory, and a monotonic time profiler — with identical semantics
//! across POSIX and Windows backends, falling back to a portable
//! generic/simulated backend wherever no native primitive exists.
//!
//! Ported from the concurrency and IPC subsystem of [plibsys](http://plibsys.org/),
//! a portable C system library.
//!
//! ## Module Organization
//!
//! ### Foundation
//! - [`error`] - Portable error taxonomy shared by every fallible operation
//! - [`cc`] - Compiler compatibility utilities (bit operations, branch hints)
//! - [`backoff`] - Exponential backoff for contention management
//!
//! ### Core Primitives
//! - [`atomic`] - Atomic integer and pointer cells, real or mutex-simulated
//!
//! ### Locks
//! - [`mutex`] - Mutual exclusion
//! - [`condvar`] - Condition variables
//! - [`rwlock`] - Reader-writer lock
//! - [`spinlock`] - Spinlock, degrading to a mutex where atomics aren't lock-free
//!
//! ### Threads
//! - [`thread`] - User threads: creation, join, priority, thread-local storage
//!
//! ### Interprocess Communication
//! - [`ipc`] - Named semaphores and named shared memory
//!
//! ### Timing
//! - [`time_profiler`] - High-resolution monotonic elapsed-microseconds reporter

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_inception)]

// =============================================================================
// Tier 0: Foundation (No Internal Dependencies)
// =============================================================================

/// Portable error taxonomy.
pub mod error;

/// Compiler compatibility utilities.
///
/// Provides bit manipulation operations (ffs, ctz, popcount) and branch prediction hints.
pub mod cc;

/// Exponential backoff for contention management.
pub mod backoff;

// =============================================================================
// Tier 1: Core Primitives (Depends on Tier 0)
// =============================================================================

/// Atomic integer and pointer cells.
pub mod atomic;

// =============================================================================
// Tier 2: Composite Locks (Depends on Tiers 0-1)
// =============================================================================

/// Mutual exclusion.
pub mod mutex;

/// Condition variables.
pub mod condvar;

/// Reader-writer lock.
pub mod rwlock;

/// Spinlock, degrading to a mutex where atomics aren't lock-free.
pub mod spinlock;

// =============================================================================
// Tier 3: Threads (Depends on Tiers 0-2)
// =============================================================================

/// User threads with thread-local storage and priorities.
pub mod thread;

// =============================================================================
// Tier 4: Interprocess Communication and Timing (Depends on Tiers 0-3)
// =============================================================================

/// Named semaphores and named shared memory.
pub mod ipc;

/// High-resolution monotonic time profiler.
pub mod time_profiler;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use atomic::{is_lock_free, AtomicInt, AtomicPtrCell};
pub use cc::{ctz, ffs, ffsl, ffsll, popcount};
pub use condvar::Condvar;
pub use error::{Error, IoErrorKind, IpcErrorKind};
pub use ipc::{Semaphore, SemaphoreAccessMode, Shm, ShmAccessPerms};
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use spinlock::Spinlock;
pub use time_profiler::TimeProfiler;
