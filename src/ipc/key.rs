//! Platform key derivation for named IPC objects (spec C8).
//!
//! Every named semaphore or shared-memory segment is addressed internally
//! by a platform key derived from the caller's logical name: a fixed
//! per-object-kind suffix is appended, the result is hashed with SHA-1, and
//! the hex digest is then shaped to whatever the host's named-IPC API
//! actually accepts.

use crate::error::{io_error, Error, IpcErrorKind};
use sha1::{Digest, Sha1};

/// Appended to a semaphore's logical name before hashing, so a semaphore and
/// a shared-memory segment opened under the same caller-chosen name never
/// collide on the same platform key.
pub const SEM_SUFFIX: &str = "_p_sem_object";
/// Appended to a shared-memory segment's logical name before hashing.
pub const SHM_SUFFIX: &str = "_p_shm_object";

/// Whether a System-V ftok key file was freshly created or already present.
/// A pre-existing key file is not an error — it means another process
/// already owns (or once owned) the same named object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFileState {
    Created,
    Existed,
}

/// Lowercase 40-character hex SHA-1 digest of `name`.
fn sha1_hex(name: &str) -> String {
    let digest = Sha1::digest(name.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derives the platform key for a logical name already carrying its
/// per-kind suffix.
///
/// `posix_style` selects, on POSIX hosts, between a `/name`-style key
/// truncated to the worst-case 14-character host limit (used by POSIX named
/// semaphores and `shm_open`) and a temp-directory file path (used as the
/// ftok key file for the System-V fallback). It is ignored on Windows,
/// where the hex digest itself is the key.
pub fn platform_key(suffixed_name: &str, posix_style: bool) -> Result<String, Error> {
    let hash = sha1_hex(suffixed_name);

    #[cfg(windows)]
    {
        let _ = posix_style;
        Ok(hash)
    }

    #[cfg(not(windows))]
    {
        if posix_style {
            let mut key = String::with_capacity(14);
            key.push('/');
            key.push_str(&hash[..hash.len().min(13)]);
            Ok(key)
        } else {
            let mut path = unix_temp_dir()?;
            path.push_str(&hash);
            Ok(path)
        }
    }
}

/// Resolves the system temp directory for System-V key files: `TMPDIR` if
/// set and non-empty, else the compiled-in `/tmp/` fallback, normalized to
/// exactly one trailing slash.
#[cfg(not(windows))]
pub fn unix_temp_dir() -> Result<String, Error> {
    let raw = std::env::var("TMPDIR").unwrap_or_default();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/tmp/".to_string())
    } else {
        let mut dir = trimmed.to_string();
        dir.push('/');
        Ok(dir)
    }
}

/// Creates the ftok key file if it doesn't already exist, mirroring
/// `p_ipc_unix_create_key_file`: `O_CREAT|O_EXCL` at mode 0640, `EEXIST`
/// reported as `Existed` rather than an error.
#[cfg(unix)]
pub fn create_key_file(path: &str) -> Result<KeyFileState, Error> {
    use std::ffi::CString;

    let c_path = CString::new(path)
        .map_err(|_| Error::new(crate::error::Kind::Ipc(IpcErrorKind::InvalidArgument), 0, "key file path contains a NUL byte"))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDONLY, 0o640) };
    if fd == -1 {
        let errno = crate::error::get_last_system();
        return if errno == libc::EEXIST {
            Ok(KeyFileState::Existed)
        } else {
            Err(io_error(errno, "open() failed creating IPC key file"))
        };
    }

    sys_close(fd)?;
    Ok(KeyFileState::Created)
}

/// Derives the System-V `ftok` key from an existing key file.
#[cfg(unix)]
pub fn ftok_key(path: &str) -> Result<i32, Error> {
    use std::ffi::CString;

    let c_path = CString::new(path)
        .map_err(|_| Error::new(crate::error::Kind::Ipc(IpcErrorKind::InvalidArgument), 0, "key file path contains a NUL byte"))?;

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(c_path.as_ptr(), &mut st) } == -1 {
        return Err(io_error(crate::error::get_last_system(), "stat() failed on IPC key file"));
    }

    let key = unsafe { libc::ftok(c_path.as_ptr(), b'P' as libc::c_int) };
    if key == -1 {
        Err(io_error(crate::error::get_last_system(), "ftok() failed"))
    } else {
        Ok(key as i32)
    }
}

/// Safe-close wrapper (spec C.2). Retries across `EINTR` everywhere except
/// Darwin, where `close()` always closes the descriptor even when it
/// reports `EINTR`; retrying there risks closing an unrelated descriptor
/// reused by another thread in the meantime.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn sys_close(fd: libc::c_int) -> Result<(), Error> {
    loop {
        if unsafe { libc::close(fd) } == 0 {
            return Ok(());
        }
        let errno = crate::error::get_last_system();
        if errno != libc::EINTR {
            return Err(io_error(errno, "close() failed"));
        }
    }
}

#[cfg(target_os = "macos")]
pub fn sys_close(fd: libc::c_int) -> Result<(), Error> {
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(io_error(crate::error::get_last_system(), "close() failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex_is_forty_lowercase_hex_chars() {
        let h = sha1_hex("hello_p_sem_object");
        assert_eq!(h.len(), 40);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sha1_hex_is_deterministic() {
        assert_eq!(sha1_hex("same_name"), sha1_hex("same_name"));
        assert_ne!(sha1_hex("name_a"), sha1_hex("name_b"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_posix_style_key_is_at_most_14_chars_and_slash_prefixed() {
        let key = platform_key("somename_p_sem_object", true).unwrap();
        assert!(key.starts_with('/'));
        assert!(key.len() <= 14);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_file_style_key_is_prefixed_by_temp_dir() {
        let dir = unix_temp_dir().unwrap();
        let key = platform_key("somename_p_shm_object", false).unwrap();
        assert!(key.starts_with(&dir));
        assert!(dir.ends_with('/'));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_key_file_reports_created_then_existed() {
        let path = format!("/tmp/syskit_test_keyfile_{}", std::process::id());
        let _ = std::fs::remove_file(&path);

        assert_eq!(create_key_file(&path).unwrap(), KeyFileState::Created);
        assert_eq!(create_key_file(&path).unwrap(), KeyFileState::Existed);

        let _ = std::fs::remove_file(&path);
    }
}
