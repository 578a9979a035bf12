//! Unix readiness backend: epoll on Linux/Android, kqueue everywhere else
//! in the BSD family (including macOS/iOS). Both expose the same
//! `Selector`/`Events`/`WakerHandle`/`TimerHandle` surface so the rest of
//! the crate never branches on which one is active.

mod common;
pub(crate) mod reactor;
pub(crate) mod socket;
pub(crate) mod timer;
pub(crate) mod types;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::{Events, Selector, TimerHandle, WakerHandle};

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) use kqueue::{Events, Selector, TimerHandle, WakerHandle};

pub(crate) use reactor::{HandleImpl, ReactorImpl};
pub(crate) use socket::SocketImpl;
pub(crate) use timer::TimerImpl;
