//! The Windows completion backend: one IOCP queue multiplexes socket
//! overlapped I/O, the cross-thread waker, and timer firings. Unlike
//! epoll/kqueue this dequeues exactly one completion per `poll` call.

use std::io;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::SOCKET;
use windows_sys::Win32::System::IO::{GetQueuedCompletionStatus, OVERLAPPED};
use windows_sys::Win32::System::Threading::INFINITE;

use crate::error::{Error, ErrorKind};
use crate::sys::windows::types::EventToken;

pub(crate) struct Selector {
    iocp: HANDLE,
}

/// One dequeued completion, translated out of the raw
/// `GetQueuedCompletionStatus` outputs.
pub(crate) struct Completion {
    pub(crate) bytes: u32,
    pub(crate) key: usize,
    pub(crate) overlapped: *mut OVERLAPPED,
    pub(crate) succeeded: bool,
    pub(crate) error: u32,
}

impl Selector {
    pub(crate) fn new() -> Result<Selector, Error> {
        let iocp = unsafe { windows_sys::Win32::System::IO::CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if iocp == 0 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "CreateIoCompletionPort"));
        }
        Ok(Selector { iocp })
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.iocp
    }

    /// Associates `fd` with this completion port, tagging every completion
    /// for it with `key` — in practice, always a pointer to the socket's
    /// `EventToken`, except that socket completions are actually
    /// identified by their `OVERLAPPED` pointer instead (see
    /// `Overlapped::token`); the association key itself goes unused by the
    /// dispatch loop but is required by the API.
    pub(crate) fn associate(&self, fd: SOCKET, key: usize) -> io::Result<()> {
        let res = unsafe {
            windows_sys::Win32::System::IO::CreateIoCompletionPort(fd as HANDLE, self.iocp, key, 0)
        };
        if res == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks for up to `timeout_ms` (or indefinitely if `None`) for the
    /// next completion. A `None` overlapped pointer with `succeeded` true
    /// and `key != 0` is a posted completion (waker or timer); everything
    /// else is a socket I/O completion.
    pub(crate) fn poll(&self, timeout_ms: Option<u32>) -> io::Result<Option<Completion>> {
        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(
                self.iocp,
                &mut bytes,
                &mut key,
                &mut overlapped,
                timeout_ms.unwrap_or(INFINITE),
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if overlapped.is_null() {
                if err.raw_os_error() == Some(windows_sys::Win32::Foundation::WAIT_TIMEOUT as i32) {
                    return Ok(None);
                }
                return Err(err);
            }
            return Ok(Some(Completion {
                bytes,
                key,
                overlapped,
                succeeded: false,
                error: err.raw_os_error().unwrap_or(0) as u32,
            }));
        }
        Ok(Some(Completion {
            bytes,
            key,
            overlapped,
            succeeded: true,
            error: 0,
        }))
    }

    pub(crate) fn token_for(&self, completion: &Completion) -> *mut EventToken {
        if completion.overlapped.is_null() {
            completion.key as *mut EventToken
        } else {
            let ov = unsafe { crate::sys::windows::types::Overlapped::from_raw(completion.overlapped) };
            ov.token
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.iocp);
        }
    }
}
