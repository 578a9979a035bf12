//! The BSD/macOS readiness backend: kqueue for multiplexing, `EVFILT_USER`
//! for work injection, `EVFILT_TIMER` for timers.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::trace;

use crate::error::{Error, ErrorKind};
use crate::sys::unix::common::{self, close};
use crate::sys::unix::types::{Event, EventToken, Interest};

const MAX_EVENTS: usize = 256;

/// `EVFILT_TIMER`/`EVFILT_USER` registrations need an `ident` that isn't a
/// real file descriptor; this counter hands out values guaranteed not to
/// collide with socket fds (which are always non-negative and, in
/// practice, small).
static NEXT_IDENT: AtomicUsize = AtomicUsize::new(1 << 30);

fn next_ident() -> usize {
    NEXT_IDENT.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct Selector {
    kq: RawFd,
}

impl Selector {
    pub(crate) fn new() -> Result<Selector, Error> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "kqueue"));
        }
        Ok(Selector { kq })
    }

    fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let res = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn io_kevents(
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        flags: u16,
    ) -> Vec<libc::kevent> {
        let mut v = Vec::with_capacity(2);
        if interest.is_readable() {
            v.push(new_kevent(fd as usize, libc::EVFILT_READ, flags, token));
        }
        if interest.is_writable() {
            v.push(new_kevent(fd as usize, libc::EVFILT_WRITE, flags, token));
        }
        v
    }

    /// kqueue's `EV_ADD` is idempotent, so the first-registration/re-arm
    /// split that epoll needs (ADD once, MOD thereafter) collapses to the
    /// same call here; `SocketImpl` still tracks registration state so the
    /// two backends present one discipline to the caller.
    pub(crate) fn register_io(
        &self,
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        oneshot: bool,
    ) -> io::Result<()> {
        self.reregister_io(fd, token, interest, oneshot)
    }

    pub(crate) fn reregister_io(
        &self,
        fd: RawFd,
        token: *mut EventToken,
        interest: Interest,
        oneshot: bool,
    ) -> io::Result<()> {
        let mut flags = libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR;
        if oneshot {
            flags |= libc::EV_ONESHOT;
        }
        self.submit(&Self::io_kevents(fd, token, interest, flags))
    }

    pub(crate) fn deregister_io(&self, fd: RawFd) -> io::Result<()> {
        let changes = [
            new_kevent(fd as usize, libc::EVFILT_READ, libc::EV_DELETE, std::ptr::null_mut()),
            new_kevent(fd as usize, libc::EVFILT_WRITE, libc::EV_DELETE, std::ptr::null_mut()),
        ];
        // ENOENT means that filter was never registered; ignore.
        let res = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
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

    pub(crate) fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as i64,
        });
        loop {
            let ts_ptr = match &ts {
                Some(ts) => ts as *const libc::timespec,
                None => std::ptr::null(),
            };
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    events.raw.as_mut_ptr(),
                    events.raw.len() as i32,
                    ts_ptr,
                )
            };
            if n == -1 {
                let err = io::Error::last_os_error();
                if common::interrupted(&err) {
                    trace!("kevent interrupted, retrying");
                    continue;
                }
                return Err(err);
            }
            events.len = n as usize;
            if n == 0 && timeout.is_none() {
                continue;
            }
            return Ok(());
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        close(self.kq);
    }
}

fn new_kevent(ident: usize, filter: i16, flags: u16, token: *mut EventToken) -> libc::kevent {
    libc::kevent {
        ident,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as *mut libc::c_void,
    }
}

pub(crate) struct Events {
    raw: Vec<libc::kevent>,
    len: usize,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Events {
        let capacity = capacity.clamp(1, MAX_EVENTS);
        Events {
            raw: vec![
                new_kevent(0, 0, 0, std::ptr::null_mut());
                capacity
            ],
            len: 0,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.raw[..self.len].iter().map(|kev| Event {
            token: kev.udata as *mut EventToken,
            readable: kev.filter == libc::EVFILT_READ || kev.filter == libc::EVFILT_TIMER,
            writable: kev.filter == libc::EVFILT_WRITE,
            error: kev.flags & libc::EV_ERROR != 0,
            hup: kev.flags & libc::EV_EOF != 0,
        })
    }
}

/// Wraps an `EVFILT_USER` registration used to wake the reactor from
/// another thread.
pub(crate) struct WakerHandle {
    kq: RawFd,
    ident: usize,
}

impl WakerHandle {
    pub(crate) fn register(selector: &Selector, token: *mut EventToken) -> Result<WakerHandle, Error> {
        let ident = next_ident();
        let kev = new_kevent(
            ident,
            libc::EVFILT_USER,
            libc::EV_ADD | libc::EV_CLEAR,
            token,
        );
        selector
            .submit(&[kev])
            .map_err(|e| Error::new(ErrorKind::RuntimeInit, "kevent", e))?;
        Ok(WakerHandle { kq: selector.kq, ident })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        let mut kev = new_kevent(self.ident, libc::EVFILT_USER, 0, std::ptr::null_mut());
        kev.fflags = libc::NOTE_TRIGGER;
        let res = unsafe { libc::kevent(self.kq, &kev, 1, std::ptr::null_mut(), 0, std::ptr::null()) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// `EVFILT_USER` clears itself (`EV_CLEAR`); nothing to drain.
    pub(crate) fn drain(&self) {}
}

impl Drop for WakerHandle {
    fn drop(&mut self) {
        let kev = new_kevent(self.ident, libc::EVFILT_USER, libc::EV_DELETE, std::ptr::null_mut());
        unsafe {
            let _ = libc::kevent(self.kq, &kev, 1, std::ptr::null_mut(), 0, std::ptr::null());
        }
    }
}

/// Wraps an `EVFILT_TIMER`, `EV_ONESHOT` registration.
pub(crate) struct TimerHandle {
    kq: RawFd,
    ident: usize,
}

impl TimerHandle {
    pub(crate) fn register(
        selector: &Selector,
        token: *mut EventToken,
        millis: u64,
    ) -> Result<TimerHandle, Error> {
        let ident = next_ident();
        let mut kev = new_kevent(
            ident,
            libc::EVFILT_TIMER,
            libc::EV_ADD | libc::EV_ONESHOT,
            token,
        );
        kev.data = millis as isize;
        selector
            .submit(&[kev])
            .map_err(|e| Error::new(ErrorKind::RuntimeInit, "kevent", e))?;
        Ok(TimerHandle { kq: selector.kq, ident })
    }

    /// `EVFILT_TIMER` carries no separate fd to drain.
    pub(crate) fn consume(&self) {}

    pub(crate) fn cancel(&self, _selector: &Selector) {
        let kev = new_kevent(self.ident, libc::EVFILT_TIMER, libc::EV_DELETE, std::ptr::null_mut());
        unsafe {
            // A timer that has already fired (EV_ONESHOT) is auto-removed;
            // ENOENT here just means cancellation lost the race.
            let _ = libc::kevent(self.kq, &kev, 1, std::ptr::null_mut(), 0, std::ptr::null());
        }
    }
}
