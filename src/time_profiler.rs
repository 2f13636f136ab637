//! Monotonic time profiler (spec C11).
//!
//! Captures a tick at construction/reset and reports elapsed microseconds
//! since. Independent of every other component in the crate — no handle
//! here ever blocks or touches shared state.

/// A single profiler instance: one captured tick, one counter.
pub struct TimeProfiler {
    counter: u64,
}

impl TimeProfiler {
    /// Captures the current tick.
    #[must_use]
    pub fn new() -> Self {
        TimeProfiler {
            counter: ticks::now(),
        }
    }

    /// Recaptures the current tick, restarting the elapsed-time window.
    pub fn reset(&mut self) {
        self.counter = ticks::now();
    }

    /// Microseconds elapsed since construction or the last [`reset`](Self::reset).
    #[must_use]
    pub fn elapsed_usecs(&self) -> u64 {
        ticks::now().saturating_sub(self.counter)
    }
}

impl Default for TimeProfiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
mod ticks {
    use std::sync::OnceLock;
    use windows_sys::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

    static FREQ: OnceLock<u64> = OnceLock::new();

    fn freq() -> u64 {
        *FREQ.get_or_init(|| {
            let mut f = 0i64;
            if unsafe { QueryPerformanceFrequency(&mut f) } != 0 && f > 0 {
                f as u64
            } else {
                0
            }
        })
    }

    /// Microseconds derived from `QueryPerformanceCounter`, falling back to
    /// `GetTickCount64` (millisecond resolution) when no high-resolution
    /// counter is available on this host.
    pub fn now() -> u64 {
        let hz = freq();
        if hz > 0 {
            let mut ticks = 0i64;
            if unsafe { QueryPerformanceCounter(&mut ticks) } != 0 {
                let ticks = ticks as u64;
                let quot = ticks / hz;
                let rem = ticks % hz;
                return quot * 1_000_000 + (rem * 1_000_000) / hz;
            }
        }
        unsafe { windows_sys::Win32::System::SystemInformation::GetTickCount64() * 1_000 }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod ticks {
    /// `clock_gettime(CLOCK_MONOTONIC)` converted to microseconds; falls
    /// back to `gettimeofday` if the monotonic clock call itself fails.
    pub fn now() -> u64 {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } == 0 {
            (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
        } else {
            gtod()
        }
    }

    fn gtod() -> u64 {
        let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
        if unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) } == 0 {
            (tv.tv_sec as u64) * 1_000_000 + (tv.tv_usec as u64)
        } else {
            0
        }
    }
}

#[cfg(target_os = "macos")]
mod ticks {
    /// `mach_absolute_time`, scaled through `mach_timebase_info`'s
    /// numerator/denominator to nanoseconds and then down to microseconds.
    /// The raw tick is divided by 1000 before scaling to avoid overflowing
    /// the `u64` multiply on long-running processes.
    use std::sync::OnceLock;

    #[repr(C)]
    struct MachTimebaseInfo {
        numer: u32,
        denom: u32,
    }

    extern "C" {
        fn mach_absolute_time() -> u64;
        fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
    }

    static TIMEBASE: OnceLock<(u32, u32)> = OnceLock::new();

    fn timebase() -> (u32, u32) {
        *TIMEBASE.get_or_init(|| {
            let mut info = MachTimebaseInfo { numer: 1, denom: 1 };
            unsafe {
                mach_timebase_info(&mut info);
            }
            (info.numer, info.denom)
        })
    }

    pub fn now() -> u64 {
        let (numer, denom) = timebase();
        let raw = unsafe { mach_absolute_time() } / 1000;
        raw * numer as u64 / denom as u64
    }
}

#[cfg(not(any(unix, windows)))]
mod ticks {
    /// No monotonic clock source on this target: falls back to
    /// second-resolution wall time, matching the generic `time() * 10^6`
    /// backend.
    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() * 1_000_000)
            .unwrap_or(0)
    }
}
