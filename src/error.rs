//! The error taxonomy surfaced by setup operations.
//!
//! Per-operation runtime failures (a failed `recv`, a failed `accept` on an
//! otherwise healthy listener) are never returned as a `Result`; they are
//! delivered to [`crate::Callbacks::on_error`] instead. `Error` is reserved
//! for failures that abort the construction or setup of an object: creating
//! the kernel multiplex handle, creating a socket, binding, listening, or a
//! fatal failure inside the dispatch loop itself.

use std::fmt;
use std::io;

/// A coarse classification of what kind of setup step failed.
///
/// This mirrors the taxonomy the reactor is specified against rather than
/// any one platform's error codes; the underlying [`std::io::Error`] still
/// carries the platform-specific detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Creating a kernel socket, or the kernel multiplex handle
    /// (epoll/kqueue/completion port/timerfd), failed.
    KernelCreate,
    /// `bind` failed (address in use, permission denied, ...).
    BindFailed,
    /// `listen` failed.
    ListenFailed,
    /// A non-blocking `connect` could not even be submitted.
    ConnectFailed,
    /// `accept` failed in a way that could not be retried.
    AcceptFailed,
    /// A read or write failed with a non-retryable error.
    IoFailed,
    /// The reactor's kernel primitive could not be created at all.
    RuntimeInit,
    /// The reactor's dispatch loop hit a fatal, unrecoverable kernel error.
    RuntimeFault,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::KernelCreate => "kernel object creation failed",
            ErrorKind::BindFailed => "bind failed",
            ErrorKind::ListenFailed => "listen failed",
            ErrorKind::ConnectFailed => "connect failed",
            ErrorKind::AcceptFailed => "accept failed",
            ErrorKind::IoFailed => "I/O operation failed",
            ErrorKind::RuntimeInit => "reactor initialization failed",
            ErrorKind::RuntimeFault => "reactor dispatch loop faulted",
        };
        f.write_str(s)
    }
}

/// The error type returned by fallible setup operations.
///
/// Carries the [`ErrorKind`], a short `hint` naming the syscall or
/// operation that failed (e.g. `"epoll_create1"`, `"bind"`, `"connect"`),
/// and the underlying [`std::io::Error`].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    hint: &'static str,
    source: io::Error,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, hint: &'static str, source: io::Error) -> Self {
        Error { kind, hint, source }
    }

    /// Build an `Error` from the current value of `errno` (POSIX) or
    /// `GetLastError` (Windows), as captured by [`io::Error::last_os_error`].
    pub(crate) fn last_os_error(kind: ErrorKind, hint: &'static str) -> Self {
        Error::new(kind, hint, io::Error::last_os_error())
    }

    /// The coarse failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The operation that failed, e.g. `"bind"` or `"epoll_create1"`.
    pub fn hint(&self) -> &'static str {
        self.hint
    }

    /// The raw OS error code, if the underlying [`io::Error`] carries one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.hint, self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        err.source
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_hint_and_source() {
        let source = io::Error::from_raw_os_error(libc_like_econnrefused());
        let err = Error::new(ErrorKind::ConnectFailed, "connect", source);
        let rendered = err.to_string();
        assert!(rendered.contains("connect failed"));
        assert!(rendered.contains("connect"));
    }

    #[test]
    fn raw_os_error_round_trips() {
        let code = libc_like_econnrefused();
        let err = Error::new(ErrorKind::ConnectFailed, "connect", io::Error::from_raw_os_error(code));
        assert_eq!(err.raw_os_error(), Some(code));
    }

    #[test]
    fn converts_into_io_error() {
        let err = Error::new(ErrorKind::IoFailed, "recv", io::Error::new(io::ErrorKind::Other, "boom"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.to_string(), "boom");
    }

    fn libc_like_econnrefused() -> i32 {
        #[cfg(unix)]
        {
            libc::ECONNREFUSED
        }
        #[cfg(windows)]
        {
            10061 // WSAECONNREFUSED
        }
    }
}
