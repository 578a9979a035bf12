//! The readiness-backed socket state machine, shared by the epoll and
//! kqueue backends through the uniform `Selector`/`Interest`/`Event` API
//! in `sys::unix`.

use std::io;
use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use log::{trace, warn};

use crate::addr::RawAddr;
use crate::callbacks::Callbacks;
use crate::config::SocketConfig;
use crate::error::{Error, ErrorKind};
use crate::socket::AsyncSocket;
use crate::sys::unix::common::{self, INVALID_FD};
use crate::sys::unix::reactor::ReactorImpl;
use crate::sys::unix::types::{Event, EventToken, Interest};
use crate::sys::unix::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Bound,
    Listening,
    Connecting,
    Connected,
    Closed,
}

pub(crate) struct SocketImpl {
    domain: i32,
    ty: i32,
    protocol: i32,
    fd: RawFd,
    selector: Rc<Selector>,
    callbacks: Callbacks,
    state: State,
    registered: bool,
    pending_write: Vec<u8>,
    write_high_water_mark: Option<usize>,
    read_scratch_size: usize,
    // Keeps the dispatch token's address stable and alive for as long as
    // this socket is registered with the kernel. See `types::EventToken`.
    token: Box<EventToken>,
}

/// Reconstructs a transient owning `AsyncSocket` around a raw `SocketImpl`
/// pointer recovered from the kernel's event data, invokes `f`, then lets
/// the temporary go without freeing anything: the real owner (wherever the
/// application is holding its `AsyncSocket`) still owns the allocation.
///
/// # Safety
///
/// `ptr` must point at a live `SocketImpl` that was boxed by this module
/// and is not concurrently being accessed (true for a single-threaded
/// reactor dispatching one event at a time).
pub(crate) unsafe fn with_socket<R>(
    ptr: *mut SocketImpl,
    f: impl FnOnce(&mut AsyncSocket) -> R,
) -> R {
    let boxed = Box::from_raw(ptr);
    let mut guard = ManuallyDrop::new(AsyncSocket::from_impl(boxed));
    f(&mut guard)
}

impl SocketImpl {
    pub(crate) fn new(
        domain: i32,
        ty: i32,
        protocol: i32,
        reactor: &ReactorImpl,
        callbacks: Callbacks,
        config: &SocketConfig,
    ) -> Result<Box<SocketImpl>, Error> {
        let fd = common::new_nonblocking_socket(domain, ty, protocol)
            .map_err(|e| Error::new(ErrorKind::KernelCreate, "socket", e))?;
        Ok(Self::from_parts(
            domain, ty, protocol, fd, reactor, callbacks, config, State::Fresh,
        ))
    }

    pub(crate) fn from_accepted(
        domain: i32,
        ty: i32,
        protocol: i32,
        fd: RawFd,
        reactor: &ReactorImpl,
        callbacks: Callbacks,
        config: &SocketConfig,
    ) -> Result<Box<SocketImpl>, Error> {
        common::adopt_nonblocking(fd).map_err(|e| Error::new(ErrorKind::KernelCreate, "fcntl", e))?;
        Ok(Self::from_parts(
            domain,
            ty,
            protocol,
            fd,
            reactor,
            callbacks,
            config,
            State::Connected,
        ))
    }

    fn from_parts(
        domain: i32,
        ty: i32,
        protocol: i32,
        fd: RawFd,
        reactor: &ReactorImpl,
        callbacks: Callbacks,
        config: &SocketConfig,
        state: State,
    ) -> Box<SocketImpl> {
        let inner = SocketImpl {
            domain,
            ty,
            protocol,
            fd,
            selector: reactor.selector_rc(),
            callbacks,
            state,
            registered: false,
            pending_write: Vec::new(),
            write_high_water_mark: config.write_high_water_mark,
            read_scratch_size: config.read_scratch_size,
            token: Box::new(EventToken::Socket(std::ptr::null_mut())),
        };
        let mut boxed = Box::new(inner);
        let self_ptr: *mut SocketImpl = &mut *boxed;
        *boxed.token = EventToken::Socket(self_ptr);
        if state == State::Connected {
            // Accepted (or promoted) sockets start with persistent read
            // interest.
            let _ = boxed.rearm(Interest::READABLE, false);
        }
        boxed
    }

    fn token_ptr(&self) -> *mut EventToken {
        &*self.token as *const EventToken as *mut EventToken
    }

    /// `EPOLL_CTL_ADD` on first use, `EPOLL_CTL_MOD` thereafter (kqueue's
    /// `EV_ADD` collapses both into one call).
    fn rearm(&mut self, interest: Interest, oneshot: bool) -> io::Result<()> {
        let token = self.token_ptr();
        if self.registered {
            self.selector.reregister_io(self.fd, token, interest, oneshot)
        } else {
            self.registered = true;
            self.selector.register_io(self.fd, token, interest, oneshot)
        }
    }

    pub(crate) fn bind(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        let raw = RawAddr::from_std(addr);
        common::bind(self.fd, &raw).map_err(|e| Error::new(ErrorKind::BindFailed, "bind", e))?;
        self.state = State::Bound;
        Ok(())
    }

    pub(crate) fn listen(&mut self, backlog: i32) -> Result<(), Error> {
        self.rearm(Interest::READABLE, false)
            .map_err(|e| Error::new(ErrorKind::ListenFailed, "epoll_ctl", e))?;
        common::listen(self.fd, backlog)
            .map_err(|e| Error::new(ErrorKind::ListenFailed, "listen", e))?;
        self.state = State::Listening;
        trace!("fd {} listening (backlog {})", self.fd, backlog);
        Ok(())
    }

    pub(crate) fn connect(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        let raw = RawAddr::from_std(addr);
        self.rearm(Interest::WRITABLE, true)
            .map_err(|e| Error::new(ErrorKind::ConnectFailed, "epoll_ctl", e))?;
        common::connect(self.fd, &raw)
            .map_err(|e| Error::new(ErrorKind::ConnectFailed, "connect", e))?;
        self.state = State::Connecting;
        Ok(())
    }

    /// Returns the number of bytes the kernel accepted on this call; the
    /// remainder (if any) is queued and owned by the socket until sent.
    pub(crate) fn write(&mut self, buf: &[u8]) -> usize {
        if !self.valid() {
            return 0;
        }
        if !self.pending_write.is_empty() {
            self.queue_pending(buf);
            return 0;
        }
        match common::send(self.fd, buf) {
            Ok(Some(n)) if n >= buf.len() => n,
            Ok(Some(n)) => {
                self.queue_pending(&buf[n..]);
                n
            }
            Ok(None) => {
                self.queue_pending(buf);
                0
            }
            Err(e) => {
                self.fire_error_from(&e, "send");
                0
            }
        }
    }

    fn queue_pending(&mut self, rest: &[u8]) {
        if rest.is_empty() {
            return;
        }
        if let Some(hwm) = self.write_high_water_mark {
            if self.pending_write.len() + rest.len() > hwm {
                warn!(
                    "fd {} pending-write buffer would exceed high-water mark {}",
                    self.fd, hwm
                );
                self.fire_error(
                    0,
                    "pending write buffer exceeded its configured high-water mark".to_string(),
                    "write",
                );
                return;
            }
        }
        self.pending_write.extend_from_slice(rest);
        let _ = self.rearm(Interest::READABLE | Interest::WRITABLE, true);
    }

    pub(crate) fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.fd != INVALID_FD {
            let _ = self.selector.deregister_io(self.fd);
            common::shutdown_write(self.fd);
            common::close(self.fd);
            self.fd = INVALID_FD;
        }
    }

    pub(crate) fn valid(&self) -> bool {
        self.fd != INVALID_FD
    }

    pub(crate) fn raw_fd(&self) -> i64 {
        self.fd as i64
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr, Error> {
        common::local_addr(self.fd).map_err(|e| Error::new(ErrorKind::IoFailed, "getsockname", e))
    }

    pub(crate) fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    pub(crate) fn handle_event(&mut self, reactor: &ReactorImpl, ev: &Event) {
        if self.state == State::Closed {
            return;
        }
        match self.state {
            State::Listening => {
                if ev.readable {
                    self.accept_loop(reactor);
                }
                if ev.error {
                    self.fire_error(0, "listening socket reported an error".to_string(), "accept");
                }
            }
            State::Connecting => {
                if ev.writable || ev.error {
                    self.complete_connect();
                }
            }
            State::Connected => {
                // A peer half-close/reset can arrive as HUP without EPOLLIN
                // set; treat it as a read edge so `read_loop`'s `recv` == 0
                // path fires `on_disconnected` instead of stranding the
                // session.
                if ev.readable || ev.hup {
                    self.read_loop();
                }
                if self.state != State::Closed && ev.writable {
                    self.drain_pending();
                }
                if self.state != State::Closed
                    && ev.error
                    && !ev.readable
                    && !ev.writable
                    && !ev.hup
                {
                    self.fire_error(0, "socket reported an error".to_string(), "recv");
                }
            }
            State::Fresh | State::Bound | State::Closed => {}
        }
    }

    fn accept_loop(&mut self, reactor: &ReactorImpl) {
        loop {
            match common::accept(self.fd) {
                Ok(Some(new_fd)) => {
                    let config = SocketConfig::default();
                    match SocketImpl::from_accepted(
                        self.domain,
                        self.ty,
                        self.protocol,
                        new_fd,
                        reactor,
                        Callbacks::default(),
                        &config,
                    ) {
                        Ok(boxed) => {
                            trace!("accepted fd {} on listener {}", new_fd, self.fd);
                            let new_socket = AsyncSocket::from_impl(boxed);
                            self.fire_accepted(new_socket);
                        }
                        Err(e) => {
                            common::close(new_fd);
                            self.fire_error(
                                e.raw_os_error().unwrap_or(0),
                                e.to_string(),
                                "accept",
                            );
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fire_error_from(&e, "accept");
                    break;
                }
            }
        }
    }

    fn complete_connect(&mut self) {
        match common::so_error(self.fd) {
            Ok(0) => {
                self.state = State::Connected;
                let _ = self.rearm(Interest::READABLE, false);
                self.fire_connected();
            }
            Ok(errno) => {
                let err = io::Error::from_raw_os_error(errno);
                self.fire_error(errno, err.to_string(), "getsockopt");
                self.close();
            }
            Err(e) => {
                self.fire_error_from(&e, "getsockopt");
                self.close();
            }
        }
    }

    fn read_loop(&mut self) {
        let mut scratch = vec![0u8; self.read_scratch_size];
        loop {
            match common::recv(self.fd, &mut scratch) {
                Ok(Some(0)) => {
                    self.fire_disconnected();
                    self.close();
                    break;
                }
                Ok(Some(n)) => {
                    self.fire_received(&scratch[..n]);
                    if self.state == State::Closed {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fire_error_from(&e, "recv");
                    break;
                }
            }
        }
    }

    fn drain_pending(&mut self) {
        if self.pending_write.is_empty() {
            return;
        }
        let buf = std::mem::take(&mut self.pending_write);
        match common::send(self.fd, &buf) {
            Ok(Some(n)) if n >= buf.len() => {
                self.fire_sent(n);
                if self.state != State::Closed {
                    let _ = self.rearm(Interest::READABLE, false);
                }
            }
            Ok(Some(n)) => {
                self.pending_write = buf[n..].to_vec();
                self.fire_sent(n);
                if self.state != State::Closed {
                    let _ = self.rearm(Interest::READABLE | Interest::WRITABLE, true);
                }
            }
            Ok(None) => {
                self.pending_write = buf;
                let _ = self.rearm(Interest::READABLE | Interest::WRITABLE, true);
            }
            Err(e) => {
                self.pending_write = buf;
                self.fire_error_from(&e, "send");
            }
        }
    }

    fn fire_error_from(&mut self, e: &io::Error, hint: &'static str) {
        self.fire_error(e.raw_os_error().unwrap_or(0), e.to_string(), hint);
    }

    fn fire_connected(&mut self) {
        if let Some(mut cb) = self.callbacks.on_connected.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s)) };
            if self.callbacks.on_connected.is_none() {
                self.callbacks.on_connected = Some(cb);
            }
        }
    }

    fn fire_disconnected(&mut self) {
        if let Some(mut cb) = self.callbacks.on_disconnected.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s)) };
            if self.callbacks.on_disconnected.is_none() {
                self.callbacks.on_disconnected = Some(cb);
            }
        }
    }

    fn fire_received(&mut self, data: &[u8]) {
        if let Some(mut cb) = self.callbacks.on_received.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s, data)) };
            if self.callbacks.on_received.is_none() {
                self.callbacks.on_received = Some(cb);
            }
        }
    }

    fn fire_sent(&mut self, n: usize) {
        if let Some(mut cb) = self.callbacks.on_sent.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s, n)) };
            if self.callbacks.on_sent.is_none() {
                self.callbacks.on_sent = Some(cb);
            }
        }
    }

    fn fire_accepted(&mut self, new_socket: AsyncSocket) {
        if let Some(mut cb) = self.callbacks.on_accepted.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s, new_socket)) };
            if self.callbacks.on_accepted.is_none() {
                self.callbacks.on_accepted = Some(cb);
            }
        }
    }

    fn fire_error(&mut self, code: i32, message: String, hint: &'static str) {
        if let Some(mut cb) = self.callbacks.on_error.take() {
            let ptr = self as *mut SocketImpl;
            unsafe { with_socket(ptr, |s| cb(s, code, message, hint)) };
            if self.callbacks.on_error.is_none() {
                self.callbacks.on_error = Some(cb);
            }
        }
    }
}

impl Drop for SocketImpl {
    fn drop(&mut self) {
        self.close();
    }
}
