//! The readiness-backed one-shot timer, shared by the epoll and kqueue
//! backends.

use std::mem::ManuallyDrop;
use std::rc::Rc;

use crate::error::Error;
use crate::sys::unix::reactor::ReactorImpl;
use crate::sys::unix::types::EventToken;
use crate::sys::unix::{Selector, TimerHandle};
use crate::timer::Timer;

pub(crate) struct TimerImpl {
    selector: Rc<Selector>,
    handle: Option<TimerHandle>,
    fired: bool,
    callback: Option<Box<dyn FnMut(&mut Timer)>>,
    token: Box<EventToken>,
}

/// See `socket::with_socket`: reconstructs a transient, non-owning `Timer`
/// handle around a raw `TimerImpl` pointer for callback dispatch.
///
/// # Safety
///
/// `ptr` must point at a live `TimerImpl` boxed by this module, accessed
/// from the single reactor thread that owns it.
pub(crate) unsafe fn with_timer<R>(ptr: *mut TimerImpl, f: impl FnOnce(&mut Timer) -> R) -> R {
    let boxed = Box::from_raw(ptr);
    let mut guard = ManuallyDrop::new(Timer::from_impl(boxed));
    f(&mut guard)
}

impl TimerImpl {
    pub(crate) fn new(
        reactor: &ReactorImpl,
        millis: u64,
        callback: Box<dyn FnMut(&mut Timer)>,
    ) -> Result<Box<TimerImpl>, Error> {
        let selector = reactor.selector_rc();
        let inner = TimerImpl {
            selector,
            handle: None,
            fired: false,
            callback: Some(callback),
            token: Box::new(EventToken::Timer(std::ptr::null_mut())),
        };
        let mut boxed = Box::new(inner);
        let self_ptr: *mut TimerImpl = &mut *boxed;
        *boxed.token = EventToken::Timer(self_ptr);
        let token_ptr = &*boxed.token as *const EventToken as *mut EventToken;
        let handle = TimerHandle::register(&boxed.selector, token_ptr, millis)?;
        boxed.handle = Some(handle);
        Ok(boxed)
    }

    pub(crate) fn handle_event(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
        if let Some(handle) = &self.handle {
            handle.consume();
        }
        if let Some(mut cb) = self.callback.take() {
            let ptr = self as *mut TimerImpl;
            unsafe { with_timer(ptr, |t| cb(t)) };
            if self.callback.is_none() {
                self.callback = Some(cb);
            }
        }
    }

    pub(crate) fn cancel(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
        if let Some(handle) = self.handle.take() {
            handle.cancel(&self.selector);
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.fired
    }
}

impl Drop for TimerImpl {
    fn drop(&mut self) {
        self.cancel();
    }
}
