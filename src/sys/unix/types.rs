//! Types shared between the epoll and kqueue backends: the readiness
//! interest bitset, the dispatch token stored as kernel user data, and a
//! backend-neutral description of one returned event.

use crate::sys::unix::socket::SocketImpl;
use crate::sys::unix::timer::TimerImpl;

/// A readiness interest: readable, writable, or both.
///
/// A tiny bitset rather than a raw platform constant, so the epoll and
/// kqueue backends can share the same call sites in `socket.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest(u8);

impl Interest {
    pub(crate) const READABLE: Interest = Interest(0b01);
    pub(crate) const WRITABLE: Interest = Interest(0b10);

    pub(crate) fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub(crate) fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// The polymorphic handler identity stored as the kernel's per-registration
/// user data (`epoll_data.ptr` / kqueue `udata`).
///
/// Each `SocketImpl`/`TimerImpl` owns a `Box<EventToken>` naming itself;
/// because that box lives as long as the owning object and is never
/// relocated, the raw pointer handed to the kernel stays valid for the
/// lifetime of the registration. See the module docs on `sys::unix` for
/// why a hand-rolled thin enum is used here instead of a `dyn` trait
/// object (kernel user-data slots are a single pointer wide; a trait
/// object's fat pointer does not fit).
pub(crate) enum EventToken {
    Socket(*mut SocketImpl),
    Timer(*mut TimerImpl),
    Waker,
}

/// One readiness event, translated from the backend-specific
/// representation (`epoll_event` / `kevent`) into booleans the dispatch
/// loop and socket state machine can test without caring which backend
/// produced them.
pub(crate) struct Event {
    pub(crate) token: *mut EventToken,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
    pub(crate) hup: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_union_combines_both_directions() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
    }

    #[test]
    fn interest_is_directional_alone() {
        assert!(Interest::READABLE.is_readable());
        assert!(!Interest::READABLE.is_writable());
        assert!(Interest::WRITABLE.is_writable());
        assert!(!Interest::WRITABLE.is_readable());
    }
}
