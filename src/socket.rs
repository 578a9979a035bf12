//! Non-blocking, callback-driven sockets.
//!
//! An [`AsyncSocket`] is a thin, movable handle around a heap-allocated
//! state machine (`sys::SocketImpl`); moving the handle only moves a
//! pointer-sized `Box`, so the socket's kernel registration — which is
//! keyed on the state machine's address — never dangles across a move.

use std::net::SocketAddr;

use crate::callbacks::Callbacks;
use crate::config::SocketConfig;
use crate::error::Error;
use crate::reactor::Reactor;
use crate::sys::SocketImpl;

/// Address family / protocol convenience selector for [`AsyncSocket`]'s
/// constructors. Mirrors the domain/type pairs the raw constructor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
}

impl Family {
    fn domain(self) -> i32 {
        match self {
            Family::Tcp4 | Family::Udp4 => libc_af_inet(),
            Family::Tcp6 | Family::Udp6 => libc_af_inet6(),
        }
    }

    fn ty(self) -> i32 {
        match self {
            Family::Tcp4 | Family::Tcp6 => libc_sock_stream(),
            Family::Udp4 | Family::Udp6 => libc_sock_dgram(),
        }
    }
}

#[cfg(unix)]
fn libc_af_inet() -> i32 {
    libc::AF_INET
}
#[cfg(unix)]
fn libc_af_inet6() -> i32 {
    libc::AF_INET6
}
#[cfg(unix)]
fn libc_sock_stream() -> i32 {
    libc::SOCK_STREAM
}
#[cfg(unix)]
fn libc_sock_dgram() -> i32 {
    libc::SOCK_DGRAM
}

#[cfg(windows)]
fn libc_af_inet() -> i32 {
    windows_sys::Win32::Networking::WinSock::AF_INET as i32
}
#[cfg(windows)]
fn libc_af_inet6() -> i32 {
    windows_sys::Win32::Networking::WinSock::AF_INET6 as i32
}
#[cfg(windows)]
fn libc_sock_stream() -> i32 {
    windows_sys::Win32::Networking::WinSock::SOCK_STREAM as i32
}
#[cfg(windows)]
fn libc_sock_dgram() -> i32 {
    windows_sys::Win32::Networking::WinSock::SOCK_DGRAM as i32
}

/// A non-blocking socket whose lifecycle is driven entirely by callbacks
/// invoked from the owning [`Reactor`]'s thread.
///
/// `AsyncSocket` is movable but not cloneable: only one handle owns the
/// underlying kernel registration at a time.
pub struct AsyncSocket(Box<SocketImpl>);

impl AsyncSocket {
    /// Creates a socket with an explicit `socket(2)`-style domain/type/
    /// protocol triple, for callers that need something [`Family`] doesn't
    /// cover.
    pub fn raw(
        reactor: &Reactor,
        domain: i32,
        ty: i32,
        protocol: i32,
        callbacks: Callbacks,
    ) -> Result<AsyncSocket, Error> {
        Self::raw_with_config(reactor, domain, ty, protocol, callbacks, SocketConfig::default())
    }

    pub fn raw_with_config(
        reactor: &Reactor,
        domain: i32,
        ty: i32,
        protocol: i32,
        callbacks: Callbacks,
        config: SocketConfig,
    ) -> Result<AsyncSocket, Error> {
        let imp = reactor.impl_ref().new_socket(domain, ty, protocol, callbacks, &config)?;
        Ok(AsyncSocket(imp))
    }

    /// Convenience constructor for the common address families.
    pub fn new(reactor: &Reactor, family: Family, callbacks: Callbacks) -> Result<AsyncSocket, Error> {
        Self::raw(reactor, family.domain(), family.ty(), 0, callbacks)
    }

    pub fn tcp_stream(reactor: &Reactor, v6: bool, callbacks: Callbacks) -> Result<AsyncSocket, Error> {
        Self::new(reactor, if v6 { Family::Tcp6 } else { Family::Tcp4 }, callbacks)
    }

    pub fn tcp_listener(reactor: &Reactor, v6: bool, callbacks: Callbacks) -> Result<AsyncSocket, Error> {
        Self::new(reactor, if v6 { Family::Tcp6 } else { Family::Tcp4 }, callbacks)
    }

    pub fn udp_socket(reactor: &Reactor, v6: bool, callbacks: Callbacks) -> Result<AsyncSocket, Error> {
        Self::new(reactor, if v6 { Family::Udp6 } else { Family::Udp4 }, callbacks)
    }

    pub fn bind(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        self.0.bind(addr)
    }

    pub fn listen(&mut self, backlog: i32) -> Result<(), Error> {
        self.0.listen(backlog)
    }

    pub fn connect(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        self.0.connect(addr)
    }

    /// Submits `buf` for sending. Returns immediately; the actual number
    /// of bytes handed to the kernel this call may be less than
    /// `buf.len()` (the remainder is queued), and `on_sent` reports
    /// progress as the queue drains.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        self.0.write(buf)
    }

    pub fn close(&mut self) {
        self.0.close()
    }

    pub fn valid(&self) -> bool {
        self.0.valid()
    }

    /// The address the kernel actually bound this socket to, useful after
    /// binding to port 0 and letting the OS pick one.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.0.local_addr()
    }

    /// The raw OS socket handle, exposed for diagnostics. Do not perform
    /// I/O on it directly; the reactor owns its readiness registration.
    pub fn raw_handle(&self) -> i64 {
        self.0.raw_fd()
    }

    /// Replaces this socket's callback bundle. Safe to call from within a
    /// callback currently executing on this same socket.
    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.0.set_callbacks(callbacks);
    }

    pub(crate) fn from_impl(imp: Box<SocketImpl>) -> AsyncSocket {
        AsyncSocket(imp)
    }

    pub(crate) fn impl_mut(&mut self) -> &mut SocketImpl {
        &mut self.0
    }
}

impl std::fmt::Debug for AsyncSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSocket")
            .field("handle", &self.raw_handle())
            .field("valid", &self.valid())
            .finish()
    }
}
