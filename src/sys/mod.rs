//! Platform dispatch. Everything above this module talks to `SocketImpl`,
//! `TimerImpl`, `ReactorImpl`, and `HandleImpl` without knowing whether
//! they're backed by epoll, kqueue, or IOCP.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{HandleImpl, ReactorImpl, SocketImpl, TimerImpl};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{HandleImpl, ReactorImpl, SocketImpl, TimerImpl};
