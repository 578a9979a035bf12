//! Minimal socket address glue.
//!
//! Address parsing and presentation are out of scope for this crate;
//! this module exists only because `bind`/`connect`/`accept` need *some*
//! raw representation to hand to the kernel. It wraps
//! `std::net::SocketAddr` rather than reimplementing textual parsing.

use std::mem;
use std::net::{IpAddr, SocketAddr};

/// Raw storage big enough for `sockaddr_in` or `sockaddr_in6`, plus the
/// length actually populated.
pub(crate) struct RawAddr {
    storage: Storage,
    len: u32,
}

#[repr(C)]
union Storage {
    v4: sockaddr_in,
    v6: sockaddr_in6,
}

#[cfg(unix)]
type sockaddr_in = libc::sockaddr_in;
#[cfg(unix)]
type sockaddr_in6 = libc::sockaddr_in6;
#[cfg(unix)]
type sa_family_t = libc::sa_family_t;

#[cfg(windows)]
type sockaddr_in = windows_sys::Win32::Networking::WinSock::SOCKADDR_IN;
#[cfg(windows)]
type sockaddr_in6 = windows_sys::Win32::Networking::WinSock::SOCKADDR_IN6;
#[cfg(windows)]
type sa_family_t = u16;

impl RawAddr {
    pub(crate) fn from_std(addr: &SocketAddr) -> RawAddr {
        match addr.ip() {
            IpAddr::V4(ip) => {
                let mut v4: sockaddr_in = unsafe { mem::zeroed() };
                set_family_v4(&mut v4);
                set_port(&mut v4.sin_port, addr.port());
                set_addr_v4(&mut v4, ip.octets());
                RawAddr {
                    storage: Storage { v4 },
                    len: mem::size_of::<sockaddr_in>() as u32,
                }
            }
            IpAddr::V6(ip) => {
                let mut v6: sockaddr_in6 = unsafe { mem::zeroed() };
                set_family_v6(&mut v6);
                set_port6(&mut v6.sin6_port, addr.port());
                set_addr_v6(&mut v6, ip.octets());
                RawAddr {
                    storage: Storage { v6 },
                    len: mem::size_of::<sockaddr_in6>() as u32,
                }
            }
        }
    }

    #[cfg(unix)]
    pub(crate) fn as_ptr(&self) -> (*const libc::sockaddr, libc::socklen_t) {
        (
            (&self.storage as *const Storage).cast(),
            self.len as libc::socklen_t,
        )
    }

    #[cfg(windows)]
    pub(crate) fn as_ptr(
        &self,
    ) -> (*const windows_sys::Win32::Networking::WinSock::SOCKADDR, i32) {
        ((&self.storage as *const Storage).cast(), self.len as i32)
    }
}

#[cfg(unix)]
fn set_family_v4(v4: &mut sockaddr_in) {
    v4.sin_family = libc::AF_INET as sa_family_t;
}
#[cfg(windows)]
fn set_family_v4(v4: &mut sockaddr_in) {
    v4.sin_family = windows_sys::Win32::Networking::WinSock::AF_INET as sa_family_t;
}

#[cfg(unix)]
fn set_family_v6(v6: &mut sockaddr_in6) {
    v6.sin6_family = libc::AF_INET6 as sa_family_t;
}
#[cfg(windows)]
fn set_family_v6(v6: &mut sockaddr_in6) {
    v6.sin6_family = windows_sys::Win32::Networking::WinSock::AF_INET6 as sa_family_t;
}

fn set_port(dst: &mut u16, port: u16) {
    *dst = port.to_be();
}
fn set_port6(dst: &mut u16, port: u16) {
    *dst = port.to_be();
}

#[cfg(unix)]
fn set_addr_v4(v4: &mut sockaddr_in, octets: [u8; 4]) {
    v4.sin_addr.s_addr = u32::from_ne_bytes(octets);
}
#[cfg(windows)]
fn set_addr_v4(v4: &mut sockaddr_in, octets: [u8; 4]) {
    unsafe {
        v4.sin_addr.S_un.S_addr = u32::from_ne_bytes(octets);
    }
}

#[cfg(unix)]
fn set_addr_v6(v6: &mut sockaddr_in6, octets: [u8; 16]) {
    v6.sin6_addr.s6_addr = octets;
}
#[cfg(windows)]
fn set_addr_v6(v6: &mut sockaddr_in6, octets: [u8; 16]) {
    unsafe {
        v6.sin6_addr.u.Byte = octets;
    }
}
