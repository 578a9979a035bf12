//! The Linux readiness backend: epoll for multiplexing, eventfd for work
//! injection, timerfd for timers.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, ErrorKind};
use crate::sys::unix::common::{self, close};
use crate::sys::unix::types::{Event, EventToken, Interest};

const MAX_EVENTS: usize = 256;

pub(crate) struct Selector {
    epfd: RawFd,
}

impl Selector {
    pub(crate) fn new() -> Result<Selector, Error> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "epoll_create1"));
        }
        Ok(Selector { epfd })
    }

    /// First-time registration: `EPOLL_CTL_ADD`.
    pub(crate) fn register_io(
        &self,
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        oneshot: bool,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest, oneshot)
    }

    /// Re-arming an already-registered fd: `EPOLL_CTL_MOD`.
    ///
    /// The source this crate is modeled on issued `ADD|MOD` as a single
    /// (invalid) operation constant; this implementation tracks
    /// registration state per socket in `SocketImpl` so `ADD` is issued
    /// exactly once and `MOD` thereafter.
    pub(crate) fn reregister_io(
        &self,
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        oneshot: bool,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest, oneshot)
    }

    pub(crate) fn deregister_io(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if res == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn ctl(
        &self,
        op: i32,
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        oneshot: bool,
    ) -> io::Result<()> {
        let mut mask: u32 = 0;
        if interest.is_readable() {
            // EPOLLRDHUP isn't implied by EPOLLIN; request it explicitly so
            // a peer half-close is visible without waiting on EPOLLHUP
            // (which the kernel always reports regardless of the mask).
            mask |= libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32;
        }
        if interest.is_writable() {
            mask |= libc::EPOLLOUT as u32;
        }
        if oneshot {
            mask |= libc::EPOLLONESHOT as u32;
        }
        let mut ev = libc::epoll_event {
            events: mask,
            u64: token as u64,
        };
        let res = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until at least one event is ready, retrying transparently on
    /// `EINTR` and on spurious zero-event returns.
    /// `timeout = None` blocks indefinitely.
    pub(crate) fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };
        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    events.raw.as_mut_ptr(),
                    events.raw.len() as i32,
                    timeout_ms,
                )
            };
            if n == -1 {
                let err = io::Error::last_os_error();
                if common::interrupted(&err) {
                    trace!("epoll_wait interrupted, retrying");
                    continue;
                }
                return Err(err);
            }
            events.len = n as usize;
            if n == 0 && timeout.is_none() {
                // Spurious wakeup with an infinite timeout: retry.
                continue;
            }
            return Ok(());
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        close(self.epfd);
    }
}

pub(crate) struct Events {
    raw: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Events {
        let capacity = capacity.clamp(1, MAX_EVENTS);
        Events {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
            len: 0,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.raw[..self.len].iter().map(|ev| Event {
            token: ev.u64 as *mut EventToken,
            readable: ev.events & (libc::EPOLLIN as u32) != 0,
            writable: ev.events & (libc::EPOLLOUT as u32) != 0,
            error: ev.events & (libc::EPOLLERR as u32) != 0,
            hup: ev.events & (libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32) != 0,
        })
    }
}

/// Wraps an `eventfd` registered for readable interest; `wake` writes to it
/// and the reactor thread drains it once woken.
pub(crate) struct WakerHandle {
    fd: RawFd,
}

impl WakerHandle {
    pub(crate) fn register(selector: &Selector, token: *mut EventToken) -> Result<WakerHandle, Error> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd == -1 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "eventfd"));
        }
        selector
            .register_io(fd, token, Interest::READABLE, false)
            .map_err(|e| Error::new(ErrorKind::RuntimeInit, "epoll_ctl", e))?;
        Ok(WakerHandle { fd })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let res = unsafe {
            libc::write(
                self.fd,
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if res == -1 {
            let err = io::Error::last_os_error();
            // Already has a pending wakeup; not an error for our purposes.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drains the eventfd counter after a wakeup so it doesn't immediately
    /// re-fire.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 8];
        loop {
            let res = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if res == -1 {
                break;
            }
        }
    }
}

impl Drop for WakerHandle {
    fn drop(&mut self) {
        close(self.fd);
    }
}

/// Wraps a one-shot `timerfd`.
pub(crate) struct TimerHandle {
    fd: RawFd,
}

impl TimerHandle {
    pub(crate) fn register(
        selector: &Selector,
        token: *mut EventToken,
        millis: u64,
    ) -> Result<TimerHandle, Error> {
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };
        if fd == -1 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "timerfd_create"));
        }
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: (millis / 1000) as libc::time_t,
                tv_nsec: ((millis % 1000) * 1_000_000) as i64,
            },
        };
        let res = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if res == -1 {
            let err = Error::last_os_error(ErrorKind::RuntimeInit, "timerfd_settime");
            close(fd);
            return Err(err);
        }
        if let Err(e) = selector.register_io(fd, token, Interest::READABLE, true) {
            close(fd);
            return Err(Error::new(ErrorKind::RuntimeInit, "epoll_ctl", e));
        }
        Ok(TimerHandle { fd })
    }

    /// Clears the timerfd's expiration counter. Called once the reactor
    /// observes the `EPOLLIN` readiness edge, before invoking the user
    /// callback.
    pub(crate) fn consume(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            let _ = libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len());
        }
    }

    pub(crate) fn cancel(&self, selector: &Selector) {
        let _ = selector.deregister_io(self.fd);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        debug!("closing timerfd {}", self.fd);
        close(self.fd);
    }
}

