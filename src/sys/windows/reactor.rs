//! The completion-backed reactor core. Dequeues exactly one completion per
//! `wait_for_input` call — unlike the readiness backends there is no
//! batch to iterate, so the work-after-events ordering guarantee
//! reduces to: run injected work only when the dequeued completion is
//! itself the waker posting.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;
use windows_sys::Win32::System::IO::PostQueuedCompletionStatus;

use crate::config::ReactorConfig;
use crate::error::{Error, ErrorKind};
use crate::sys::windows::iocp::Selector;
use crate::sys::windows::socket::{self, SocketImpl};
use crate::sys::windows::timer::{self, TimerImpl};
use crate::sys::windows::types::{EventToken, Overlapped};

type Work = Box<dyn FnOnce() + Send>;

struct Shared {
    work: Mutex<Vec<Work>>,
    stopped: AtomicBool,
    iocp: windows_sys::Win32::Foundation::HANDLE,
    waker_token_key: usize,
}

pub(crate) struct ReactorImpl {
    selector: Rc<Selector>,
    shared: Arc<Shared>,
    waker_token: Box<EventToken>,
}

#[derive(Clone)]
pub(crate) struct HandleImpl {
    shared: Arc<Shared>,
}

impl ReactorImpl {
    pub(crate) fn new(_config: &ReactorConfig) -> Result<ReactorImpl, Error> {
        let selector = Rc::new(Selector::new()?);
        let waker_token = Box::new(EventToken::Waker);
        let waker_token_key = &*waker_token as *const EventToken as usize;
        let shared = Arc::new(Shared {
            work: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            iocp: selector.raw(),
            waker_token_key,
        });
        Ok(ReactorImpl {
            selector,
            shared,
            waker_token,
        })
    }

    pub(crate) fn selector_rc(&self) -> Rc<Selector> {
        self.selector.clone()
    }

    pub(crate) fn handle(&self) -> HandleImpl {
        HandleImpl {
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn new_socket(
        &self,
        domain: i32,
        ty: i32,
        protocol: i32,
        callbacks: crate::callbacks::Callbacks,
        config: &crate::config::SocketConfig,
    ) -> Result<Box<SocketImpl>, Error> {
        SocketImpl::new(domain, ty, protocol, self, callbacks, config)
    }

    pub(crate) fn new_timer(
        &self,
        millis: u64,
        callback: Box<dyn FnMut(&mut crate::timer::Timer)>,
    ) -> Result<Box<TimerImpl>, Error> {
        TimerImpl::new(self, millis, callback)
    }

    pub(crate) fn wait_for_input(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let timeout_ms = timeout.map(|d| d.as_millis().min(u32::MAX as u128) as u32);
        let completion = self
            .selector
            .poll(timeout_ms)
            .map_err(|e| Error::new(ErrorKind::RuntimeFault, "GetQueuedCompletionStatus", e))?;
        let Some(completion) = completion else {
            return Ok(());
        };

        let token_ptr = self.selector.token_for(&completion);
        if token_ptr.is_null() {
            return Ok(());
        }
        // SAFETY: the token was produced by a registration this reactor
        // made; its owner outlives the registration.
        let token = unsafe { &*token_ptr };
        match token {
            EventToken::Socket(ptr) => {
                let ptr = *ptr;
                let kind = unsafe { Overlapped::from_raw(completion.overlapped).kind };
                let reactor: &ReactorImpl = self;
                unsafe {
                    socket::with_socket(ptr, |s| {
                        s.impl_mut().handle_completion(
                            reactor,
                            kind,
                            completion.succeeded,
                            completion.bytes,
                        )
                    });
                }
            }
            EventToken::Timer(ptr) => {
                let ptr = *ptr;
                unsafe {
                    timer::with_timer(ptr, |t| t.impl_mut().handle_event());
                }
            }
            EventToken::Waker => {
                self.run_pending_work();
            }
        }
        Ok(())
    }

    fn run_pending_work(&self) {
        let batch = std::mem::take(&mut *self.shared.work.lock().unwrap());
        trace!("running {} injected work item(s)", batch.len());
        for job in batch {
            job();
        }
    }
}

impl HandleImpl {
    pub(crate) fn exec(&self, job: Box<dyn FnOnce() + Send>) {
        self.shared.work.lock().unwrap().push(job);
        unsafe {
            let _ = PostQueuedCompletionStatus(
                self.shared.iocp,
                0,
                self.shared.waker_token_key,
                std::ptr::null_mut(),
            );
        }
    }

    pub(crate) fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        unsafe {
            let _ = PostQueuedCompletionStatus(
                self.shared.iocp,
                0,
                self.shared.waker_token_key,
                std::ptr::null_mut(),
            );
        }
    }
}
