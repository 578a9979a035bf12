//! Types shared by the IOCP backend's socket, timer, and reactor modules.

use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::sys::windows::socket::SocketImpl;
use crate::sys::windows::timer::TimerImpl;

/// The handler identity a completion carries back to the dispatch loop.
///
/// For socket operations this is recovered from the `Overlapped` the
/// operation was issued with (see [`Overlapped::token`]); for timers and
/// the cross-thread waker it is posted directly as the completion key via
/// `PostQueuedCompletionStatus`, since those completions carry no
/// `OVERLAPPED` of their own.
pub(crate) enum EventToken {
    Socket(*mut SocketImpl),
    Timer(*mut TimerImpl),
    Waker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Accept,
    Connect,
    Read,
    Write,
}

/// An in-flight overlapped operation.
///
/// `raw` MUST be the first field: IOCP hands back a `*mut OVERLAPPED`
/// pointing at the address the operation was issued with, and this struct
/// is recovered from it with a pointer cast, matching the standard
/// "intrusive OVERLAPPED" pattern used by every IOCP-based reactor.
#[repr(C)]
pub(crate) struct Overlapped {
    pub(crate) raw: OVERLAPPED,
    pub(crate) kind: OpKind,
    pub(crate) token: *mut EventToken,
}

impl Overlapped {
    pub(crate) fn new(kind: OpKind, token: *mut EventToken) -> Box<Overlapped> {
        Box::new(Overlapped {
            raw: unsafe { std::mem::zeroed() },
            kind,
            token,
        })
    }

    pub(crate) fn as_ptr(&mut self) -> *mut OVERLAPPED {
        &mut self.raw as *mut OVERLAPPED
    }

    /// # Safety
    /// `ptr` must have been produced by [`Overlapped::as_ptr`] on a value
    /// still alive and of this exact layout.
    pub(crate) unsafe fn from_raw<'a>(ptr: *mut OVERLAPPED) -> &'a mut Overlapped {
        &mut *(ptr as *mut Overlapped)
    }
}
