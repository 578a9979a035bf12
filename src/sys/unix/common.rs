//! Raw, non-blocking POSIX socket syscalls shared by the epoll and kqueue
//! backends.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

use crate::addr::RawAddr;

/// Execute a libc call that signals failure with `-1`, converting it into
/// an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) const INVALID_FD: RawFd = -1;

pub(crate) fn new_nonblocking_socket(domain: i32, ty: i32, protocol: i32) -> io::Result<RawFd> {
    let fd = syscall!(socket(domain, ty, protocol))?;
    set_nonblocking(fd)?;
    set_cloexec(fd)?;
    Ok(fd)
}

pub(crate) fn adopt_nonblocking(fd: RawFd) -> io::Result<()> {
    set_nonblocking(fd)?;
    set_cloexec(fd)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL, 0))?;
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFD, 0))?;
    syscall!(fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
    Ok(())
}

pub(crate) fn bind(fd: RawFd, addr: &RawAddr) -> io::Result<()> {
    let (ptr, len) = addr.as_ptr();
    syscall!(bind(fd, ptr, len))?;
    Ok(())
}

pub(crate) fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    syscall!(listen(fd, backlog))?;
    Ok(())
}

/// Returns `Ok(())` whether the connect finished immediately or is in
/// progress (`EINPROGRESS`). Any other error is returned as-is.
pub(crate) fn connect(fd: RawFd, addr: &RawAddr) -> io::Result<()> {
    let (ptr, len) = addr.as_ptr();
    match syscall!(connect(fd, ptr, len)) {
        Ok(_) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `Ok(None)` means `EAGAIN`/`EWOULDBLOCK` — no pending connection.
pub(crate) fn accept(fd: RawFd) -> io::Result<Option<RawFd>> {
    match syscall!(accept(fd, std::ptr::null_mut(), std::ptr::null_mut())) {
        Ok(new_fd) => {
            adopt_nonblocking(new_fd)?;
            Ok(Some(new_fd))
        }
        Err(e) if would_block(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `Ok(None)` means the call would have blocked; nothing was sent.
pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    match syscall!(send(
        fd,
        buf.as_ptr().cast(),
        buf.len(),
        libc::MSG_NOSIGNAL
    )) {
        Ok(n) => Ok(Some(n as usize)),
        Err(e) if would_block(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `Ok(None)` means the call would have blocked.
pub(crate) fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match syscall!(recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0)) {
        Ok(n) => Ok(Some(n as usize)),
        Err(e) if would_block(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getsockname(
        fd,
        (&mut storage as *mut libc::sockaddr_storage).cast(),
        &mut len
    ))?;
    sockaddr_storage_to_std(&storage)
}

fn sockaddr_storage_to_std(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let addr: libc::sockaddr_in =
                unsafe { *(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(addr.sin_port))))
        }
        libc::AF_INET6 => {
            let addr: libc::sockaddr_in6 =
                unsafe { *(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported address family")),
    }
}

pub(crate) fn so_error(fd: RawFd) -> io::Result<i32> {
    let mut err: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
    syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        (&mut err as *mut i32).cast(),
        &mut len
    ))?;
    Ok(err)
}

pub(crate) fn shutdown_write(fd: RawFd) {
    unsafe {
        let _ = libc::shutdown(fd, libc::SHUT_WR);
    }
}

pub(crate) fn close(fd: RawFd) {
    unsafe {
        let _ = libc::close(fd);
    }
}

pub(crate) fn would_block(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    ) || e.kind() == io::ErrorKind::WouldBlock
}

pub(crate) fn in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS)
}

pub(crate) fn interrupted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Interrupted
}
