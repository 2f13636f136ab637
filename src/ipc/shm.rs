//! Named shared-memory segment (spec C10).
//!
//! Pairs a memory mapping with an internal [`Semaphore`] (opened under the
//! same platform key) so callers have a ready-made mutual-exclusion
//! primitive without managing a second named object themselves. The
//! mapping itself is not synchronized by this type — `lock`/`unlock` are a
//! convenience, not a requirement for the mapping to be valid.

use crate::error::{ipc_error, Error, IpcErrorKind};
use crate::ipc::key;
use crate::ipc::semaphore::{AccessMode, Semaphore};
use log::warn;

/// Requested access to a mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPerms {
    ReadOnly,
    ReadWrite,
}

pub struct Shm {
    inner: backend::ShmImpl,
    sem: Semaphore,
    created: bool,
    platform_key: String,
    size: usize,
    perms: AccessPerms,
}

// SAFETY: the mapped base address is valid for the lifetime of the handle
// and all access to it past construction is the caller's responsibility,
// same contract as a raw pointer the caller chooses to share across
// threads.
unsafe impl Send for Shm {}
unsafe impl Sync for Shm {}

impl Shm {
    /// Creates or opens a named shared-memory segment. `size` of `0` opens
    /// an existing segment only; on an existing segment the actual mapped
    /// size (read back from the OS) wins over a smaller requested size.
    pub fn new(name: &str, size: usize, perms: AccessPerms) -> Result<Self, Error> {
        let suffixed = format!("{name}{}", key::SHM_SUFFIX);
        let platform_key = key::platform_key(&suffixed, true)?;

        let (inner, created, actual_size) = backend::ShmImpl::open(&platform_key, size, perms)?;

        let sem_mode = if created { AccessMode::ForceCreateReset } else { AccessMode::OpenOrCreate };
        let sem = Semaphore::new(&platform_key, 1, sem_mode)?;

        let effective_size = if actual_size > size && size != 0 { size } else { actual_size };

        Ok(Shm {
            inner,
            sem,
            created,
            platform_key,
            size: effective_size,
            perms,
        })
    }

    /// Marks this handle (and its internal semaphore) as the owner, so
    /// [`Drop`] unlinks the underlying OS objects.
    pub fn take_ownership(&mut self) {
        self.created = true;
        self.sem.take_ownership();
    }

    pub fn lock(&self) -> Result<(), Error> {
        self.sem.acquire()
    }

    pub fn unlock(&self) -> Result<(), Error> {
        self.sem.release()
    }

    /// The mapped base address, valid for the lifetime of this handle.
    #[must_use]
    pub fn address(&self) -> *mut u8 {
        self.inner.address()
    }

    /// The actual mapped size, which may exceed a smaller requested size
    /// when reopening an existing segment.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn perms(&self) -> AccessPerms {
        self.perms
    }
}

impl Drop for Shm {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close(self.created, &self.platform_key, self.size) {
            warn!("failed to tear down shared memory {}: {e}", self.platform_key);
        }
    }
}

#[cfg(unix)]
mod backend {
    use super::*;
    use std::ffi::CString;

    pub struct ShmImpl {
        addr: *mut libc::c_void,
        mapped_len: usize,
    }

    impl ShmImpl {
        pub fn open(platform_key: &str, size: usize, perms: AccessPerms) -> Result<(Self, bool, usize), Error> {
            let c_key = CString::new(platform_key).map_err(|_| {
                Error::new(crate::error::Kind::Ipc(IpcErrorKind::InvalidArgument), 0, "name contains a NUL byte")
            })?;

            let mut is_exists = false;
            let mut fd = loop {
                let f = unsafe {
                    libc::shm_open(c_key.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, 0o660)
                };
                if f != -1 || crate::error::get_last_system() != libc::EINTR {
                    break f;
                }
            };

            if fd == -1 && crate::error::get_last_system() == libc::EEXIST {
                is_exists = true;
                fd = loop {
                    let f = unsafe { libc::shm_open(c_key.as_ptr(), libc::O_RDWR, 0o660) };
                    if f != -1 || crate::error::get_last_system() != libc::EINTR {
                        break f;
                    }
                };
            }

            if fd == -1 {
                return Err(ipc_error(crate::error::get_last_system(), "shm_open() failed"));
            }

            let actual_size = if is_exists {
                let mut st: libc::stat = unsafe { std::mem::zeroed() };
                if unsafe { libc::fstat(fd, &mut st) } == -1 {
                    let err = ipc_error(crate::error::get_last_system(), "fstat() failed");
                    let _ = key::sys_close(fd);
                    return Err(err);
                }
                st.st_size as usize
            } else {
                if unsafe { libc::ftruncate(fd, size as libc::off_t) } == -1 {
                    let err = ipc_error(crate::error::get_last_system(), "ftruncate() failed");
                    let _ = key::sys_close(fd);
                    return Err(err);
                }
                size
            };

            let prot = match perms {
                AccessPerms::ReadOnly => libc::PROT_READ,
                AccessPerms::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            };

            let addr = unsafe {
                libc::mmap(std::ptr::null_mut(), actual_size, prot, libc::MAP_SHARED, fd, 0)
            };

            if addr == libc::MAP_FAILED {
                let err = ipc_error(crate::error::get_last_system(), "mmap() failed");
                let _ = key::sys_close(fd);
                return Err(err);
            }

            if let Err(e) = key::sys_close(fd) {
                warn!("shm_open fd close failed after mmap: {e}");
            }

            Ok((ShmImpl { addr, mapped_len: actual_size }, !is_exists, actual_size))
        }

        #[must_use]
        pub fn address(&self) -> *mut u8 {
            self.addr as *mut u8
        }

        pub fn close(&mut self, owner: bool, platform_key: &str, _size: usize) -> Result<(), Error> {
            if !self.addr.is_null() && unsafe { libc::munmap(self.addr, self.mapped_len) } == -1 {
                return Err(ipc_error(crate::error::get_last_system(), "munmap() failed"));
            }
            self.addr = std::ptr::null_mut();

            if owner {
                let c_key = CString::new(platform_key).expect("platform key is NUL-free by construction");
                if unsafe { libc::shm_unlink(c_key.as_ptr()) } == -1 {
                    return Err(ipc_error(crate::error::get_last_system(), "shm_unlink() failed"));
                }
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
mod backend {
    use super::*;
    use std::ffi::OsStr;
    use std::iter::once;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, ERROR_ALREADY_EXISTS};
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE, PAGE_READONLY, PAGE_READWRITE,
    };

    pub struct ShmImpl {
        mapping: HANDLE,
        addr: *mut std::ffi::c_void,
        len: usize,
    }

    unsafe impl Send for ShmImpl {}

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(once(0)).collect()
    }

    impl ShmImpl {
        pub fn open(platform_key: &str, size: usize, perms: AccessPerms) -> Result<(Self, bool, usize), Error> {
            let name = wide(platform_key);
            let (protect, map_access) = match perms {
                AccessPerms::ReadOnly => (PAGE_READONLY, FILE_MAP_READ),
                AccessPerms::ReadWrite => (PAGE_READWRITE, FILE_MAP_READ | FILE_MAP_WRITE),
            };

            let mapping = unsafe {
                CreateFileMappingW(
                    std::ptr::null_mut(),
                    std::ptr::null(),
                    protect,
                    0,
                    size as u32,
                    name.as_ptr(),
                )
            };
            if mapping.is_null() {
                return Err(ipc_error(crate::error::get_last_system(), "CreateFileMappingW() failed"));
            }
            let is_exists = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;

            let addr = unsafe { MapViewOfFile(mapping, map_access, 0, 0, 0) };
            if addr.is_null() {
                let err = ipc_error(crate::error::get_last_system(), "MapViewOfFile() failed");
                unsafe { CloseHandle(mapping) };
                return Err(err);
            }

            Ok((ShmImpl { mapping, addr, len: size }, !is_exists, size))
        }

        #[must_use]
        pub fn address(&self) -> *mut u8 {
            self.addr as *mut u8
        }

        pub fn close(&mut self, _owner: bool, _platform_key: &str, _size: usize) -> Result<(), Error> {
            if !self.addr.is_null() {
                unsafe { UnmapViewOfFile(self.addr) };
                self.addr = std::ptr::null_mut();
            }
            if !self.mapping.is_null() {
                unsafe { CloseHandle(self.mapping) };
                self.mapping = std::ptr::null_mut();
            }
            let _ = self.len;
            Ok(())
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod backend {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    /// No shared-memory facility on this target: segments are simulated as
    /// process-local boxed buffers keyed by platform key, leaked for the
    /// process lifetime (matching the "survives until explicitly unlinked"
    /// lifecycle of the real backends).
    static SEGMENTS: OnceLock<Mutex<HashMap<String, *mut u8>>> = OnceLock::new();

    fn segments() -> &'static Mutex<HashMap<String, *mut u8>> {
        SEGMENTS.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub struct ShmImpl {
        addr: *mut u8,
    }

    unsafe impl Send for ShmImpl {}

    impl ShmImpl {
        pub fn open(platform_key: &str, size: usize, _perms: AccessPerms) -> Result<(Self, bool, usize), Error> {
            let mut map = segments().lock().unwrap_or_else(|p| p.into_inner());
            let created = !map.contains_key(platform_key);
            let addr = *map.entry(platform_key.to_string()).or_insert_with(|| {
                let mut buf = vec![0u8; size.max(1)].into_boxed_slice();
                let ptr = buf.as_mut_ptr();
                std::mem::forget(buf);
                ptr
            });
            Ok((ShmImpl { addr }, created, size.max(1)))
        }

        #[must_use]
        pub fn address(&self) -> *mut u8 {
            self.addr
        }

        pub fn close(&mut self, owner: bool, platform_key: &str, _size: usize) -> Result<(), Error> {
            if owner {
                segments().lock().unwrap_or_else(|p| p.into_inner()).remove(platform_key);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "syskit_test_shm_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    // SHM-1: a segment created read-write and written by one handle is
    // visible, byte for byte, to a second handle opened under the same
    // name.
    #[test]
    fn test_shm_1_write_then_reopen_observes_bytes() {
        let name = unique_name("rw");

        let mut writer = Shm::new(&name, 4096, AccessPerms::ReadWrite).unwrap();
        writer.take_ownership();
        assert_eq!(writer.size(), 4096);

        writer.lock().unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(b"HELLO".as_ptr(), writer.address(), 5);
        }
        writer.unlock().unwrap();

        let reader = Shm::new(&name, 0, AccessPerms::ReadWrite).unwrap();
        reader.lock().unwrap();
        let mut buf = [0u8; 5];
        unsafe {
            std::ptr::copy_nonoverlapping(reader.address(), buf.as_mut_ptr(), 5);
        }
        reader.unlock().unwrap();
        assert_eq!(&buf, b"HELLO");

        drop(reader);
        drop(writer);
    }
}
