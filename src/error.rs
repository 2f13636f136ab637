//! Portable error taxonomy.
//!
//! Every fallible operation in this crate returns `Result<T, Error>`. An
//! [`Error`] carries a portable [`Kind`] (so callers can match on it without
//! inspecting platform-specific numbers or message text), the native error
//! code that produced it, and a short human-readable message.
//!
//! The two leaf enums, [`IoErrorKind`] and [`IpcErrorKind`], keep the numeric
//! discriminants of their originating domains (the 500-range and 600-range
//! respectively) so that logged or serialized error codes stay stable.

use core::fmt;

/// Which domain an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// No domain was specified (an empty/cleared error).
    None,
    /// Input/output domain.
    Io,
    /// Interprocess communication domain.
    Ipc,
}

/// Portable I/O error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum IoErrorKind {
    /// No error.
    #[error("no error")]
    None = 500,
    /// Operating system has no resources left.
    #[error("operating system has no resources left")]
    NoResources,
    /// Resource isn't available.
    #[error("resource is not available")]
    NotAvailable,
    /// Access denied.
    #[error("access denied")]
    AccessDenied,
    /// Already connected.
    #[error("already connected")]
    Connected,
    /// Operation in progress.
    #[error("operation in progress")]
    InProgress,
    /// Operation aborted.
    #[error("operation aborted")]
    Aborted,
    /// Invalid argument specified.
    #[error("invalid argument specified")]
    InvalidArgument,
    /// Operation not supported.
    #[error("operation not supported")]
    NotSupported,
    /// Operation timed out.
    #[error("operation timed out")]
    TimedOut,
    /// Operation cannot be completed immediately.
    #[error("operation would block")]
    WouldBlock,
    /// Address already in use.
    #[error("address already in use")]
    AddressInUse,
    /// Connection refused.
    #[error("connection refused")]
    ConnectionRefused,
    /// Connection required first.
    #[error("not connected")]
    NotConnected,
    /// User quota exceeded.
    #[error("quota exceeded")]
    Quota,
    /// Trying to open a directory for writing.
    #[error("is a directory")]
    IsDirectory,
    /// Component of the path prefix is not a directory.
    #[error("not a directory")]
    NotDirectory,
    /// Specified name is too long.
    #[error("name too long")]
    NameTooLong,
    /// Specified entry already exists.
    #[error("already exists")]
    Exists,
    /// Specified entry doesn't exist.
    #[error("does not exist")]
    NotExists,
    /// No more data left.
    #[error("no more data")]
    NoMore,
    /// Operation is not implemented.
    #[error("not implemented")]
    NotImplemented,
    /// General/unclassified error.
    #[error("general I/O failure")]
    Failed,
}

/// Portable IPC error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum IpcErrorKind {
    /// No error.
    #[error("no error")]
    None = 600,
    /// Not enough rights to access the object or its key.
    #[error("access denied")]
    Access,
    /// Object already exists and no proper open flags were specified.
    #[error("already exists")]
    Exists,
    /// Object doesn't exist, or was removed, and no proper create flags were specified.
    #[error("does not exist")]
    NotExists,
    /// Not enough system resources or memory to perform the operation.
    #[error("not enough resources")]
    NoResources,
    /// Semaphore value overflow.
    #[error("value overflow")]
    Overflow,
    /// Object name is too long.
    #[error("name too long")]
    NameTooLong,
    /// Invalid argument specified.
    #[error("invalid argument specified")]
    InvalidArgument,
    /// Operation is not implemented on this platform.
    #[error("not implemented")]
    NotImplemented,
    /// Deadlock detected.
    #[error("deadlock detected")]
    Deadlock,
    /// General/unclassified error.
    #[error("general IPC failure")]
    Failed,
}

/// The portable kind carried by an [`Error`]: either unset, or one of the
/// two domain-specific leaf enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// No kind was set (an empty/cleared error).
    None,
    /// I/O domain error.
    Io(IoErrorKind),
    /// IPC domain error.
    Ipc(IpcErrorKind),
}

impl Kind {
    /// The domain this kind belongs to.
    #[must_use]
    pub fn domain(self) -> Domain {
        match self {
            Kind::None => Domain::None,
            Kind::Io(_) => Domain::Io,
            Kind::Ipc(_) => Domain::Ipc,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::None => write!(f, "no error"),
            Kind::Io(k) => write!(f, "{k}"),
            Kind::Ipc(k) => write!(f, "{k}"),
        }
    }
}

/// A caller-owned error object: a portable [`Kind`], the native error code
/// that produced it (`0` if there is none), and a short message.
///
/// `Error` is never thread-global; every fallible call returns its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: Kind,
    native_code: i32,
    message: String,
}

impl Error {
    /// Construct an empty error (kind `None`, native code `0`, empty message).
    #[must_use]
    pub fn empty() -> Self {
        Error {
            kind: Kind::None,
            native_code: 0,
            message: String::new(),
        }
    }

    /// Construct a fully populated error.
    pub fn new(kind: Kind, native_code: i32, message: impl Into<String>) -> Self {
        Error {
            kind,
            native_code,
            message: message.into(),
        }
    }

    /// Construct an error from an I/O kind with no native code or message.
    pub fn from_io(kind: IoErrorKind) -> Self {
        Error::new(Kind::Io(kind), 0, "")
    }

    /// Construct an error from an IPC kind with no native code or message.
    pub fn from_ipc(kind: IpcErrorKind) -> Self {
        Error::new(Kind::Ipc(kind), 0, "")
    }

    /// The portable kind.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The domain derived from `kind`.
    #[must_use]
    pub fn domain(&self) -> Domain {
        self.kind.domain()
    }

    /// The native error code (`0` if none was recorded).
    #[must_use]
    pub fn native_code(&self) -> i32 {
        self.native_code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Overwrite the kind.
    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = kind;
    }

    /// Overwrite the native code.
    pub fn set_native_code(&mut self, native_code: i32) {
        self.native_code = native_code;
    }

    /// Overwrite the message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Reset to the empty state (kind `None`, native code `0`, message freed).
    pub fn clear(&mut self) {
        self.kind = Kind::None;
        self.native_code = 0;
        self.message.clear();
    }
}

impl Default for Error {
    fn default() -> Self {
        Error::empty()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Native error code -> portable kind mapping
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod native {
    use super::{IoErrorKind, IpcErrorKind};

    /// Maps a POSIX `errno` value to an [`IoErrorKind`]. Exhaustive over the
    /// errno values plibsys' `perror.c` classifies; anything else collapses
    /// to `Failed`.
    #[must_use]
    pub fn io_kind_from_errno(errno: i32) -> IoErrorKind {
        match errno {
            libc::EACCES | libc::EPERM => IoErrorKind::AccessDenied,
            libc::EMFILE | libc::ENFILE | libc::ENOMEM => IoErrorKind::NoResources,
            libc::EAGAIN => IoErrorKind::WouldBlock,
            libc::EALREADY | libc::EISCONN => IoErrorKind::Connected,
            libc::EINPROGRESS => IoErrorKind::InProgress,
            libc::EINTR => IoErrorKind::Aborted,
            libc::EINVAL => IoErrorKind::InvalidArgument,
            libc::ENOSYS | libc::EOPNOTSUPP | libc::ENOTSUP => IoErrorKind::NotSupported,
            libc::ETIMEDOUT => IoErrorKind::TimedOut,
            libc::EADDRINUSE => IoErrorKind::AddressInUse,
            libc::ECONNREFUSED => IoErrorKind::ConnectionRefused,
            libc::ENOTCONN => IoErrorKind::NotConnected,
            libc::EDQUOT => IoErrorKind::Quota,
            libc::EISDIR => IoErrorKind::IsDirectory,
            libc::ENOTDIR => IoErrorKind::NotDirectory,
            libc::ENAMETOOLONG => IoErrorKind::NameTooLong,
            libc::EEXIST => IoErrorKind::Exists,
            libc::ENOENT => IoErrorKind::NotExists,
            0 => IoErrorKind::None,
            _ => IoErrorKind::Failed,
        }
    }

    /// Maps a POSIX `errno` value to an [`IpcErrorKind`]. Exhaustive over the
    /// errno values plibsys' semaphore/shm backends classify; anything else
    /// collapses to `Failed`.
    #[must_use]
    pub fn ipc_kind_from_errno(errno: i32) -> IpcErrorKind {
        match errno {
            libc::EACCES | libc::EPERM => IpcErrorKind::Access,
            libc::EEXIST => IpcErrorKind::Exists,
            libc::ENOENT | libc::EIDRM => IpcErrorKind::NotExists,
            libc::ENOSPC | libc::ENOMEM | libc::EMFILE | libc::ENFILE => IpcErrorKind::NoResources,
            libc::ERANGE | libc::EOVERFLOW => IpcErrorKind::Overflow,
            libc::ENAMETOOLONG => IpcErrorKind::NameTooLong,
            libc::EINVAL => IpcErrorKind::InvalidArgument,
            libc::ENOSYS => IpcErrorKind::NotImplemented,
            libc::EDEADLK => IpcErrorKind::Deadlock,
            0 => IpcErrorKind::None,
            _ => IpcErrorKind::Failed,
        }
    }
}

#[cfg(windows)]
mod native {
    use super::{IoErrorKind, IpcErrorKind};
    use windows_sys::Win32::Foundation::*;

    /// Maps a Win32 error code to an [`IoErrorKind`].
    #[must_use]
    pub fn io_kind_from_errno(code: i32) -> IoErrorKind {
        match code as u32 {
            ERROR_ACCESS_DENIED => IoErrorKind::AccessDenied,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY | ERROR_TOO_MANY_OPEN_FILES => {
                IoErrorKind::NoResources
            }
            ERROR_IO_PENDING => IoErrorKind::InProgress,
            ERROR_OPERATION_ABORTED => IoErrorKind::Aborted,
            ERROR_INVALID_PARAMETER => IoErrorKind::InvalidArgument,
            ERROR_NOT_SUPPORTED | ERROR_CALL_NOT_IMPLEMENTED => IoErrorKind::NotSupported,
            ERROR_SEM_TIMEOUT | WAIT_TIMEOUT => IoErrorKind::TimedOut,
            ERROR_ADDRESS_ALREADY_ASSOCIATED => IoErrorKind::AddressInUse,
            ERROR_CONNECTION_REFUSED => IoErrorKind::ConnectionRefused,
            ERROR_NOT_CONNECTED => IoErrorKind::NotConnected,
            ERROR_DISK_QUOTA_EXCEEDED => IoErrorKind::Quota,
            ERROR_DIRECTORY => IoErrorKind::NotDirectory,
            ERROR_FILENAME_EXCED_RANGE | ERROR_BUFFER_OVERFLOW => IoErrorKind::NameTooLong,
            ERROR_ALREADY_EXISTS | ERROR_FILE_EXISTS => IoErrorKind::Exists,
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => IoErrorKind::NotExists,
            ERROR_NO_MORE_FILES | ERROR_NO_MORE_ITEMS => IoErrorKind::NoMore,
            0 => IoErrorKind::None,
            _ => IoErrorKind::Failed,
        }
    }

    /// Maps a Win32 error code to an [`IpcErrorKind`].
    #[must_use]
    pub fn ipc_kind_from_errno(code: i32) -> IpcErrorKind {
        match code as u32 {
            ERROR_ACCESS_DENIED => IpcErrorKind::Access,
            ERROR_ALREADY_EXISTS | ERROR_FILE_EXISTS => IpcErrorKind::Exists,
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => IpcErrorKind::NotExists,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY | ERROR_COMMITMENT_LIMIT => {
                IpcErrorKind::NoResources
            }
            ERROR_TOO_MANY_POSTS => IpcErrorKind::Overflow,
            ERROR_FILENAME_EXCED_RANGE => IpcErrorKind::NameTooLong,
            ERROR_INVALID_PARAMETER | ERROR_INVALID_HANDLE => IpcErrorKind::InvalidArgument,
            ERROR_CALL_NOT_IMPLEMENTED => IpcErrorKind::NotImplemented,
            ERROR_POSSIBLE_DEADLOCK => IpcErrorKind::Deadlock,
            0 => IpcErrorKind::None,
            _ => IpcErrorKind::Failed,
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod native {
    use super::{IoErrorKind, IpcErrorKind};

    /// No known native classification on this target; everything collapses
    /// to `Failed` (mirrors plibsys' `-none` backends).
    #[must_use]
    pub fn io_kind_from_errno(code: i32) -> IoErrorKind {
        if code == 0 {
            IoErrorKind::None
        } else {
            IoErrorKind::Failed
        }
    }

    /// No known native classification on this target; everything collapses
    /// to `Failed`.
    #[must_use]
    pub fn ipc_kind_from_errno(code: i32) -> IpcErrorKind {
        if code == 0 {
            IpcErrorKind::None
        } else {
            IpcErrorKind::Failed
        }
    }
}

pub use native::{io_kind_from_errno, ipc_kind_from_errno};

/// Builds an [`Error`] in the I/O domain from a native error code.
pub fn io_error(native_code: i32, message: impl Into<String>) -> Error {
    Error::new(Kind::Io(io_kind_from_errno(native_code)), native_code, message)
}

/// Builds an [`Error`] in the IPC domain from a native error code.
pub fn ipc_error(native_code: i32, message: impl Into<String>) -> Error {
    Error::new(Kind::Ipc(ipc_kind_from_errno(native_code)), native_code, message)
}

// ---------------------------------------------------------------------------
// Last-error access
// ---------------------------------------------------------------------------

/// Returns the calling thread's last system error code (aliases `errno` on
/// POSIX, the thread's last Win32 error on Windows).
#[must_use]
pub fn get_last_system() -> i32 {
    #[cfg(unix)]
    {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }
    #[cfg(windows)]
    {
        unsafe { windows_sys::Win32::Foundation::GetLastError() as i32 }
    }
    #[cfg(not(any(unix, windows)))]
    {
        0
    }
}

/// Sets the calling thread's last system error code.
pub fn set_last_system(code: i32) {
    #[cfg(unix)]
    {
        unsafe { set_errno(code) };
    }
    #[cfg(windows)]
    {
        unsafe { windows_sys::Win32::Foundation::SetLastError(code as u32) };
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
    }
}

/// Returns the calling thread's last network error code. On POSIX this
/// aliases `errno` (sockets share the same error channel as other syscalls);
/// on Windows it is `WSAGetLastError`, a distinct thread-local slot.
#[must_use]
pub fn get_last_net() -> i32 {
    #[cfg(windows)]
    {
        unsafe { windows_sys::Win32::Networking::WinSock::WSAGetLastError() as i32 }
    }
    #[cfg(not(windows))]
    {
        get_last_system()
    }
}

/// Sets the calling thread's last network error code.
pub fn set_last_net(code: i32) {
    #[cfg(windows)]
    {
        unsafe { windows_sys::Win32::Networking::WinSock::WSASetLastError(code) };
    }
    #[cfg(not(windows))]
    {
        set_last_system(code);
    }
}

#[cfg(target_os = "linux")]
unsafe fn set_errno(code: i32) {
    unsafe { *libc::__errno_location() = code };
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
unsafe fn set_errno(code: i32) {
    unsafe { *libc::__error() = code };
}

#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "macos", target_os = "ios"))
))]
unsafe fn set_errno(code: i32) {
    unsafe { *libc::__errno_location() = code };
}
