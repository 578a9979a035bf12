//! The readiness-backed reactor core: a single-threaded dispatch loop over
//! `Selector::poll`, plus a `Send + Sync` handle for cross-thread work
//! injection and shutdown.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;

use crate::config::ReactorConfig;
use crate::error::{Error, ErrorKind};
use crate::sys::unix::socket::{self, SocketImpl};
use crate::sys::unix::timer::{self, TimerImpl};
use crate::sys::unix::types::EventToken;
use crate::sys::unix::{Events, Selector, WakerHandle};

type Work = Box<dyn FnOnce() + Send>;

struct Shared {
    waker: WakerHandle,
    work: Mutex<Vec<Work>>,
    stopped: AtomicBool,
}

pub(crate) struct ReactorImpl {
    selector: Rc<Selector>,
    events: Events,
    shared: Arc<Shared>,
    waker_token: Box<EventToken>,
}

/// The cross-thread half of a reactor: cloneable, `Send + Sync`, able to
/// inject work or request a stop from any thread.
#[derive(Clone)]
pub(crate) struct HandleImpl {
    shared: Arc<Shared>,
}

impl ReactorImpl {
    pub(crate) fn new(config: &ReactorConfig) -> Result<ReactorImpl, Error> {
        let selector = Rc::new(Selector::new()?);
        let waker_token = Box::new(EventToken::Waker);
        let token_ptr = &*waker_token as *const EventToken as *mut EventToken;
        let waker = WakerHandle::register(&selector, token_ptr)?;
        let shared = Arc::new(Shared {
            waker,
            work: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        Ok(ReactorImpl {
            selector,
            events: Events::with_capacity(config.event_batch_size),
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

    /// Blocks for at most `timeout` waiting for I/O readiness, dispatches
    /// every event in the batch, then runs any work injected via `exec`
    /// strictly after that batch — never interleaved mid-batch.
    pub(crate) fn wait_for_input(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.selector
            .poll(&mut self.events, timeout)
            .map_err(|e| Error::new(ErrorKind::RuntimeFault, "epoll_wait/kevent", e))?;

        let mut woken = false;
        let batch: Vec<_> = self.events.iter().collect();
        for ev in batch {
            if ev.token.is_null() {
                continue;
            }
            // SAFETY: the token was produced by a registration this
            // reactor made; its owner outlives the registration.
            let token = unsafe { &*ev.token };
            match token {
                EventToken::Socket(ptr) => {
                    let ptr = *ptr;
                    let reactor: &ReactorImpl = self;
                    unsafe {
                        socket::with_socket(ptr, |s| s.impl_mut().handle_event(reactor, &ev));
                    }
                }
                EventToken::Timer(ptr) => {
                    let ptr = *ptr;
                    unsafe {
                        timer::with_timer(ptr, |t| t.impl_mut().handle_event());
                    }
                }
                EventToken::Waker => {
                    woken = true;
                }
            }
        }

        if woken {
            self.shared.waker.drain();
            self.run_pending_work();
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
        let _ = self.shared.waker.wake();
    }

    pub(crate) fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.shared.waker.wake();
    }
}
