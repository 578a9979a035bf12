//! The completion-backed socket state machine: `AcceptEx`/`ConnectEx` to
//! start the lifecycle transitions, `WSARecv`/`WSASend` to move bytes,
//! driven by completions the reactor dispatches from the IOCP queue.

use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::os::raw::c_void;
use std::rc::Rc;

use log::trace;
use windows_sys::Win32::Networking::WinSock::{
    self, LPFN_ACCEPTEX, LPFN_CONNECTEX, SOCKET, WSABUF,
};

use crate::addr::RawAddr;
use crate::callbacks::Callbacks;
use crate::config::SocketConfig;
use crate::error::{Error, ErrorKind};
use crate::socket::AsyncSocket;
use crate::sys::windows::common::{self, INVALID_SOCKET};
use crate::sys::windows::iocp::Selector;
use crate::sys::windows::reactor::ReactorImpl;
use crate::sys::windows::types::{EventToken, OpKind, Overlapped};

const ACCEPT_ADDR_LEN: u32 = 16 + std::mem::size_of::<WinSock::SOCKADDR_IN6>() as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Bound,
    Listening,
    Connecting,
    Connected,
    Closed,
}

struct AcceptOp {
    ov: Overlapped,
    new_socket: Option<Box<SocketImpl>>,
    buf: [u8; (ACCEPT_ADDR_LEN * 2) as usize],
}

struct ReadOp {
    ov: Overlapped,
    buf: Vec<u8>,
}

struct WriteOp {
    ov: Overlapped,
    buf: Vec<u8>,
    in_flight: bool,
}

pub(crate) struct SocketImpl {
    domain: i32,
    ty: i32,
    protocol: i32,
    fd: SOCKET,
    selector: Rc<Selector>,
    callbacks: Callbacks,
    state: State,
    pending_write: Vec<u8>,
    write_high_water_mark: Option<usize>,
    read_scratch_size: usize,
    write_scratch_size: usize,
    accept_ex: LPFN_ACCEPTEX,
    connect_ex: LPFN_CONNECTEX,
    accept_op: Option<Box<AcceptOp>>,
    read_op: Option<Box<ReadOp>>,
    write_op: Option<Box<WriteOp>>,
    connect_op: Option<Box<Overlapped>>,
    token: Box<EventToken>,
}

/// See the Unix backend's `with_socket`: reconstructs a non-owning
/// `AsyncSocket` around a raw `SocketImpl` pointer for callback dispatch.
///
/// # Safety
/// `ptr` must point at a live `SocketImpl` boxed by this module, accessed
/// only from the reactor's thread.
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
        let fd = common::new_overlapped_socket(domain, ty, protocol)
            .map_err(|e| Error::new(ErrorKind::KernelCreate, "WSASocket", e))?;
        Self::from_parts(domain, ty, protocol, fd, reactor, callbacks, config, State::Fresh)
    }

    fn from_parts(
        domain: i32,
        ty: i32,
        protocol: i32,
        fd: SOCKET,
        reactor: &ReactorImpl,
        callbacks: Callbacks,
        config: &SocketConfig,
        state: State,
    ) -> Result<Box<SocketImpl>, Error> {
        let selector = reactor.selector_rc();
        let inner = SocketImpl {
            domain,
            ty,
            protocol,
            fd,
            selector,
            callbacks,
            state,
            pending_write: Vec::new(),
            write_high_water_mark: config.write_high_water_mark,
            read_scratch_size: config.read_scratch_size,
            write_scratch_size: config.write_scratch_size,
            accept_ex: None,
            connect_ex: None,
            accept_op: None,
            read_op: None,
            write_op: None,
            connect_op: None,
            token: Box::new(EventToken::Socket(std::ptr::null_mut())),
        };
        let mut boxed = Box::new(inner);
        let self_ptr: *mut SocketImpl = &mut *boxed;
        *boxed.token = EventToken::Socket(self_ptr);
        let token_key = &*boxed.token as *const EventToken as usize;
        boxed
            .selector
            .associate(boxed.fd, token_key)
            .map_err(|e| Error::new(ErrorKind::KernelCreate, "CreateIoCompletionPort", e))?;
        if state == State::Connected {
            boxed.start_read();
        }
        Ok(boxed)
    }

    fn token_ptr(&self) -> *mut EventToken {
        &*self.token as *const EventToken as *mut EventToken
    }

    pub(crate) fn bind(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        let raw = RawAddr::from_std(addr);
        common::bind(self.fd, &raw).map_err(|e| Error::new(ErrorKind::BindFailed, "bind", e))?;
        self.state = State::Bound;
        Ok(())
    }

    pub(crate) fn listen(&mut self, backlog: i32) -> Result<(), Error> {
        self.accept_ex = common::load_accept_ex(self.fd)
            .map_err(|e| Error::new(ErrorKind::ListenFailed, "WSAIoctl/AcceptEx", e))?;
        common::listen(self.fd, backlog)
            .map_err(|e| Error::new(ErrorKind::ListenFailed, "listen", e))?;
        self.state = State::Listening;
        self.start_accept();
        Ok(())
    }

    pub(crate) fn connect(&mut self, addr: &SocketAddr) -> Result<(), Error> {
        // ConnectEx requires the socket be bound first, even to a
        // wildcard address.
        let bind_any = match addr {
            SocketAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
            SocketAddr::V6(_) => "[::]:0".parse().unwrap(),
        };
        self.bind(&bind_any)?;
        self.connect_ex = common::load_connect_ex(self.fd)
            .map_err(|e| Error::new(ErrorKind::ConnectFailed, "WSAIoctl/ConnectEx", e))?;
        let connect_ex = self
            .connect_ex
            .ok_or_else(|| Error::new(ErrorKind::ConnectFailed, "ConnectEx unavailable", std::io::Error::from_raw_os_error(0)))?;
        let raw = RawAddr::from_std(addr);
        let mut op = Overlapped::new(OpKind::Connect, self.token_ptr());
        let (ptr, len) = raw.as_ptr();
        let ok = unsafe { connect_ex(self.fd, ptr, len, std::ptr::null(), 0, std::ptr::null_mut(), op.as_ptr()) };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            if !common::would_block_pending(&err) {
                return Err(Error::new(ErrorKind::ConnectFailed, "ConnectEx", err));
            }
        }
        self.connect_op = Some(op);
        self.state = State::Connecting;
        Ok(())
    }

    fn start_accept(&mut self) {
        if self.accept_op.is_some() {
            return;
        }
        let Some(accept_ex) = self.accept_ex else {
            return;
        };
        let config = SocketConfig::default();
        let reactor_selector = self.selector.clone();
        let new_fd = match common::new_overlapped_socket(self.domain, self.ty, self.protocol) {
            Ok(fd) => fd,
            Err(e) => {
                self.fire_error(0, e.to_string(), "WSASocket");
                return;
            }
        };
        let new_socket = match build_pending_accept_socket(
            self.domain,
            self.ty,
            self.protocol,
            new_fd,
            reactor_selector,
            &config,
        ) {
            Ok(s) => s,
            Err(e) => {
                common::close(new_fd);
                self.fire_error(0, e.to_string(), "AcceptEx/prepare");
                return;
            }
        };
        let mut op = Box::new(AcceptOp {
            ov: Overlapped {
                raw: unsafe { std::mem::zeroed() },
                kind: OpKind::Accept,
                token: self.token_ptr(),
            },
            new_socket: Some(new_socket),
            buf: [0u8; (ACCEPT_ADDR_LEN * 2) as usize],
        });
        let mut bytes: u32 = 0;
        let ok = unsafe {
            accept_ex(
                self.fd,
                new_fd,
                op.buf.as_mut_ptr().cast::<c_void>(),
                0,
                ACCEPT_ADDR_LEN,
                ACCEPT_ADDR_LEN,
                &mut bytes,
                op.ov.as_ptr(),
            )
        };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            if !common::would_block_pending(&err) {
                self.fire_error(0, err.to_string(), "AcceptEx");
                return;
            }
        }
        self.accept_op = Some(op);
    }

    fn start_read(&mut self) {
        if self.read_op.is_some() {
            return;
        }
        let mut op = Box::new(ReadOp {
            ov: Overlapped {
                raw: unsafe { std::mem::zeroed() },
                kind: OpKind::Read,
                token: self.token_ptr(),
            },
            buf: vec![0u8; self.read_scratch_size],
        });
        let mut wsabuf = WSABUF {
            len: op.buf.len() as u32,
            buf: op.buf.as_mut_ptr(),
        };
        let mut bytes: u32 = 0;
        let mut flags: u32 = 0;
        let res = unsafe {
            WinSock::WSARecv(self.fd, &mut wsabuf, 1, &mut bytes, &mut flags, op.ov.as_ptr(), None)
        };
        if res == WinSock::SOCKET_ERROR {
            let err = std::io::Error::last_os_error();
            if !common::would_block_pending(&err) {
                self.fire_error_from(&err, "WSARecv");
                return;
            }
        }
        self.read_op = Some(op);
    }

    /// Copies up to `write_scratch_size` bytes into the in-flight buffer
    /// and issues `WSASend`; returns the number of bytes accepted. Any
    /// remainder beyond the scratch size is handed to `queue_pending` so
    /// it still passes through the high-water-mark check.
    pub(crate) fn write(&mut self, buf: &[u8]) -> usize {
        if !self.valid() {
            return 0;
        }
        if self.write_op.is_some() {
            self.queue_pending(buf);
            return 0;
        }
        let accepted = self.issue_write(buf);
        if accepted < buf.len() {
            self.queue_pending(&buf[accepted..]);
        }
        accepted
    }

    fn issue_write(&mut self, buf: &[u8]) -> usize {
        let cap = buf.len().min(self.write_scratch_size);
        let chunk = &buf[..cap];
        let mut op = Box::new(WriteOp {
            ov: Overlapped {
                raw: unsafe { std::mem::zeroed() },
                kind: OpKind::Write,
                token: self.token_ptr(),
            },
            buf: chunk.to_vec(),
            in_flight: true,
        });
        let mut wsabuf = WSABUF {
            len: op.buf.len() as u32,
            buf: op.buf.as_mut_ptr(),
        };
        let res = unsafe {
            WinSock::WSASend(self.fd, &mut wsabuf, 1, std::ptr::null_mut(), 0, op.ov.as_ptr(), None)
        };
        let accepted = op.buf.len();
        if res == WinSock::SOCKET_ERROR {
            let err = std::io::Error::last_os_error();
            if !common::would_block_pending(&err) {
                self.fire_error_from(&err, "WSASend");
                return 0;
            }
        }
        self.write_op = Some(op);
        accepted
    }

    fn queue_pending(&mut self, rest: &[u8]) {
        if rest.is_empty() {
            return;
        }
        if let Some(hwm) = self.write_high_water_mark {
            if self.pending_write.len() + rest.len() > hwm {
                self.fire_error(
                    0,
                    "pending write buffer exceeded its configured high-water mark".to_string(),
                    "write",
                );
                return;
            }
        }
        self.pending_write.extend_from_slice(rest);
    }

    pub(crate) fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        if self.fd != INVALID_SOCKET {
            common::close(self.fd);
            self.fd = INVALID_SOCKET;
        }
    }

    pub(crate) fn valid(&self) -> bool {
        self.fd != INVALID_SOCKET
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

    /// Dispatches one completion addressed to this socket. `kind` and
    /// `succeeded`/`bytes` come straight off the `OVERLAPPED` completion;
    /// the reactor has already matched the `OVERLAPPED` pointer back to
    /// this socket via its token.
    pub(crate) fn handle_completion(
        &mut self,
        reactor: &ReactorImpl,
        kind: OpKind,
        succeeded: bool,
        bytes: u32,
    ) {
        if self.state == State::Closed {
            return;
        }
        match kind {
            OpKind::Accept => self.complete_accept(reactor, succeeded),
            OpKind::Connect => self.complete_connect(succeeded),
            OpKind::Read => self.complete_read(succeeded, bytes),
            OpKind::Write => self.complete_write(succeeded, bytes),
        }
    }

    fn complete_accept(&mut self, reactor: &ReactorImpl, succeeded: bool) {
        let Some(mut op) = self.accept_op.take() else {
            return;
        };
        if succeeded {
            if let Some(mut new_socket) = op.new_socket.take() {
                new_socket.start_read();
                trace!("AcceptEx completed for listener {}", self.fd);
                let async_socket = AsyncSocket::from_impl(new_socket);
                self.fire_accepted(async_socket);
            }
        } else {
            if let Some(new_socket) = op.new_socket.take() {
                drop(new_socket);
            }
            self.fire_error(0, "AcceptEx completion failed".to_string(), "accept");
        }
        if self.state == State::Listening {
            let _ = reactor;
            self.start_accept();
        }
    }

    fn complete_connect(&mut self, succeeded: bool) {
        self.connect_op = None;
        if !succeeded {
            self.fire_error(0, "ConnectEx completion failed".to_string(), "connect");
            self.close();
            return;
        }
        let _ = unsafe {
            WinSock::setsockopt(
                self.fd,
                WinSock::SOL_SOCKET as i32,
                WinSock::SO_UPDATE_CONNECT_CONTEXT as i32,
                std::ptr::null(),
                0,
            )
        };
        match common::so_error(self.fd) {
            Ok(0) => {
                self.state = State::Connected;
                self.start_read();
                self.fire_connected();
            }
            Ok(errno) => {
                let err = std::io::Error::from_raw_os_error(errno);
                self.fire_error(errno, err.to_string(), "getsockopt");
                self.close();
            }
            Err(e) => {
                self.fire_error_from(&e, "getsockopt");
                self.close();
            }
        }
    }

    fn complete_read(&mut self, succeeded: bool, bytes: u32) {
        let Some(op) = self.read_op.take() else {
            return;
        };
        if !succeeded {
            self.fire_error(0, "WSARecv completion failed".to_string(), "recv");
            return;
        }
        if bytes == 0 {
            self.fire_disconnected();
            self.close();
            return;
        }
        self.fire_received(&op.buf[..bytes as usize]);
        if self.state != State::Closed {
            self.start_read();
        }
    }

    fn complete_write(&mut self, succeeded: bool, bytes: u32) {
        let op = self.write_op.take();
        if !succeeded {
            self.fire_error(0, "WSASend completion failed".to_string(), "send");
            return;
        }
        let _ = op;
        self.fire_sent(bytes as usize);
        if self.state != State::Closed && !self.pending_write.is_empty() {
            let rest = std::mem::take(&mut self.pending_write);
            let n = self.issue_write(&rest);
            if n < rest.len() {
                self.pending_write = rest[n..].to_vec();
            }
        }
    }

    fn fire_error_from(&mut self, e: &std::io::Error, hint: &'static str) {
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

fn build_pending_accept_socket(
    domain: i32,
    ty: i32,
    protocol: i32,
    fd: SOCKET,
    selector: Rc<Selector>,
    config: &SocketConfig,
) -> Result<Box<SocketImpl>, Error> {
    let inner = SocketImpl {
        domain,
        ty,
        protocol,
        fd,
        selector,
        callbacks: Callbacks::default(),
        state: State::Connected,
        pending_write: Vec::new(),
        write_high_water_mark: config.write_high_water_mark,
        read_scratch_size: config.read_scratch_size,
        write_scratch_size: config.write_scratch_size,
        accept_ex: None,
        connect_ex: None,
        accept_op: None,
        read_op: None,
        write_op: None,
        connect_op: None,
        token: Box::new(EventToken::Socket(std::ptr::null_mut())),
    };
    let mut boxed = Box::new(inner);
    let self_ptr: *mut SocketImpl = &mut *boxed;
    *boxed.token = EventToken::Socket(self_ptr);
    let token_key = &*boxed.token as *const EventToken as usize;
    boxed
        .selector
        .associate(boxed.fd, token_key)
        .map_err(|e| Error::new(ErrorKind::KernelCreate, "CreateIoCompletionPort", e))?;
    Ok(boxed)
}

impl Drop for SocketImpl {
    fn drop(&mut self) {
        self.close();
    }
}
