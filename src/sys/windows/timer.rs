//! One-shot timers on Windows: `CreateTimerQueueTimer` fires on a system
//! thread-pool thread, which immediately reposts onto the reactor's IOCP
//! queue via `PostQueuedCompletionStatus` so the user callback still runs
//! on the reactor's own thread, matching the readiness backends' model.

use std::mem::ManuallyDrop;
use std::os::raw::c_void;
use std::rc::Rc;

use windows_sys::Win32::Foundation::{BOOLEAN, HANDLE};
use windows_sys::Win32::System::IO::PostQueuedCompletionStatus;
use windows_sys::Win32::System::Threading::{
    CreateTimerQueueTimer, DeleteTimerQueueTimer, WT_EXECUTEONLYONCE,
};

use crate::error::{Error, ErrorKind};
use crate::sys::windows::iocp::Selector;
use crate::sys::windows::reactor::ReactorImpl;
use crate::sys::windows::types::EventToken;
use crate::timer::Timer;

struct RepostContext {
    iocp: HANDLE,
    token: usize,
}

unsafe extern "system" fn repost_on_fire(ctx: *mut c_void, _timer_or_wait_fired: BOOLEAN) {
    let ctx = &*(ctx as *const RepostContext);
    let _ = PostQueuedCompletionStatus(ctx.iocp, 0, ctx.token, std::ptr::null_mut());
}

pub(crate) struct TimerImpl {
    selector: Rc<Selector>,
    os_timer: HANDLE,
    ctx: Box<RepostContext>,
    fired: bool,
    callback: Option<Box<dyn FnMut(&mut Timer)>>,
    token: Box<EventToken>,
}

/// See the Unix backend's `with_timer`.
///
/// # Safety
/// `ptr` must point at a live `TimerImpl` boxed by this module, accessed
/// only from the reactor's thread.
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
            os_timer: 0,
            ctx: Box::new(RepostContext { iocp: 0, token: 0 }),
            fired: false,
            callback: Some(callback),
            token: Box::new(EventToken::Timer(std::ptr::null_mut())),
        };
        let mut boxed = Box::new(inner);
        let self_ptr: *mut TimerImpl = &mut *boxed;
        *boxed.token = EventToken::Timer(self_ptr);
        let token_key = &*boxed.token as *const EventToken as usize;
        boxed.ctx = Box::new(RepostContext {
            iocp: boxed.selector.raw(),
            token: token_key,
        });

        let mut handle: HANDLE = 0;
        let ctx_ptr: *const RepostContext = &*boxed.ctx;
        let ok = unsafe {
            CreateTimerQueueTimer(
                &mut handle,
                0,
                Some(repost_on_fire),
                ctx_ptr.cast(),
                millis as u32,
                0,
                WT_EXECUTEONLYONCE,
            )
        };
        if ok == 0 {
            return Err(Error::last_os_error(ErrorKind::RuntimeInit, "CreateTimerQueueTimer"));
        }
        boxed.os_timer = handle;
        Ok(boxed)
    }

    pub(crate) fn handle_event(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
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
        if self.os_timer != 0 {
            unsafe {
                let _ = DeleteTimerQueueTimer(0, self.os_timer, 0);
            }
            self.os_timer = 0;
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
