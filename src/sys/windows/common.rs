//! Winsock glue: process-wide startup, overlapped socket creation, and the
//! `AcceptEx`/`ConnectEx` extension function pointers IOCP needs.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock::{
    self, LPFN_ACCEPTEX, LPFN_CONNECTEX, SIO_GET_EXTENSION_FUNCTION_POINTER, SOCKET,
    SOCKET_ERROR, WSADATA, WSAID_ACCEPTEX, WSAID_CONNECTEX,
};

use crate::addr::RawAddr;

static WSA_STARTUP: Once = Once::new();

pub(crate) fn ensure_wsa_startup() {
    WSA_STARTUP.call_once(|| unsafe {
        let mut data: WSADATA = std::mem::zeroed();
        let version: u16 = 0x0202; // Winsock 2.2
        let _ = WinSock::WSAStartup(version, &mut data);
    });
}

pub(crate) const INVALID_SOCKET: SOCKET = WinSock::INVALID_SOCKET;

pub(crate) fn new_overlapped_socket(domain: i32, ty: i32, protocol: i32) -> io::Result<SOCKET> {
    ensure_wsa_startup();
    let fd = unsafe {
        WinSock::WSASocketW(
            domain,
            ty,
            protocol,
            std::ptr::null(),
            0,
            WinSock::WSA_FLAG_OVERLAPPED,
        )
    };
    if fd == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

pub(crate) fn bind(fd: SOCKET, addr: &RawAddr) -> io::Result<()> {
    let (ptr, len) = addr.as_ptr();
    let res = unsafe { WinSock::bind(fd, ptr, len) };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn listen(fd: SOCKET, backlog: i32) -> io::Result<()> {
    let res = unsafe { WinSock::listen(fd, backlog) };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn so_error(fd: SOCKET) -> io::Result<i32> {
    let mut err: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as i32;
    let res = unsafe {
        WinSock::getsockopt(
            fd,
            WinSock::SOL_SOCKET as i32,
            WinSock::SO_ERROR as i32,
            (&mut err as *mut i32).cast(),
            &mut len,
        )
    };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(err)
}

pub(crate) fn local_addr(fd: SOCKET) -> io::Result<SocketAddr> {
    let mut storage: WinSock::SOCKADDR_STORAGE = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<WinSock::SOCKADDR_STORAGE>() as i32;
    let res = unsafe { WinSock::getsockname(fd, (&mut storage as *mut _).cast(), &mut len) };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    match storage.ss_family {
        WinSock::AF_INET => {
            let addr: WinSock::SOCKADDR_IN = unsafe { *(&storage as *const _ as *const WinSock::SOCKADDR_IN) };
            let octets = unsafe { addr.sin_addr.S_un.S_addr.to_ne_bytes() };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(octets),
                u16::from_be(addr.sin_port),
            )))
        }
        WinSock::AF_INET6 => {
            let addr: WinSock::SOCKADDR_IN6 = unsafe { *(&storage as *const _ as *const WinSock::SOCKADDR_IN6) };
            let octets = unsafe { addr.sin6_addr.u.Byte };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                unsafe { addr.Anonymous.sin6_scope_id },
            )))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported address family")),
    }
}

pub(crate) fn close(fd: SOCKET) {
    unsafe {
        let _ = WinSock::closesocket(fd);
    }
}

/// Loads `AcceptEx` via `WSAIoctl(SIO_GET_EXTENSION_FUNCTION_POINTER)`; the
/// function pointer is socket-type-specific but stable across sockets of
/// the same address family, so callers fetch it once per listener.
pub(crate) fn load_accept_ex(fd: SOCKET) -> io::Result<LPFN_ACCEPTEX> {
    let mut guid = WSAID_ACCEPTEX;
    let mut func: LPFN_ACCEPTEX = None;
    let mut bytes: u32 = 0;
    let res = unsafe {
        WinSock::WSAIoctl(
            fd,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            (&mut guid as *mut _).cast(),
            std::mem::size_of_val(&guid) as u32,
            (&mut func as *mut _).cast(),
            std::mem::size_of_val(&func) as u32,
            &mut bytes,
            std::ptr::null_mut(),
            None,
        )
    };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(func)
}

pub(crate) fn load_connect_ex(fd: SOCKET) -> io::Result<LPFN_CONNECTEX> {
    let mut guid = WSAID_CONNECTEX;
    let mut func: LPFN_CONNECTEX = None;
    let mut bytes: u32 = 0;
    let res = unsafe {
        WinSock::WSAIoctl(
            fd,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            (&mut guid as *mut _).cast(),
            std::mem::size_of_val(&guid) as u32,
            (&mut func as *mut _).cast(),
            std::mem::size_of_val(&func) as u32,
            &mut bytes,
            std::ptr::null_mut(),
            None,
        )
    };
    if res == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(func)
}

pub(crate) fn would_block_pending(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(code) if code == WinSock::WSA_IO_PENDING as i32
    )
}
