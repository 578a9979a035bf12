//! The event loop: [`Reactor`] owns the kernel multiplexer and runs on a
//! single thread; [`Handle`] is a `Clone + Send + Sync` handle other
//! threads use to inject work or request a stop.

use std::time::Duration;

use crate::config::ReactorConfig;
use crate::error::Error;
use crate::sys::{HandleImpl, ReactorImpl};

/// Owns the reactor's kernel object (epoll/kqueue/IOCP) and dispatch loop.
///
/// Not `Send`/`Sync`: a `Reactor` is confined to the thread that created
/// it. Sockets and timers constructed against it borrow that confinement
/// transitively. Use [`Reactor::handle`] to get a handle other
/// threads can use to inject work or stop the loop.
pub struct Reactor {
    inner: ReactorImpl,
}

impl Reactor {
    pub fn new() -> Result<Reactor, Error> {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> Result<Reactor, Error> {
        Ok(Reactor {
            inner: ReactorImpl::new(&config)?,
        })
    }

    /// Returns a cloneable, thread-safe handle for injecting work
    /// ([`Handle::exec`]) or requesting a stop ([`Handle::stop`]) from any
    /// thread, including this one.
    pub fn handle(&self) -> Handle {
        Handle(self.inner.handle())
    }

    /// Runs the dispatch loop until [`Handle::stop`] is called.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.inner.stopped() {
            self.inner.wait_for_input(None)?;
        }
        Ok(())
    }

    /// Runs the dispatch loop until `timeout` elapses with nothing ready,
    /// [`Handle::stop`] is called, or an event arrives — whichever comes
    /// first. Returns without blocking further once one batch has been
    /// dispatched.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        if self.inner.stopped() {
            return Ok(());
        }
        self.inner.wait_for_input(timeout)
    }

    pub(crate) fn impl_ref(&self) -> &ReactorImpl {
        &self.inner
    }
}

/// A `Clone + Send + Sync` handle to a running [`Reactor`].
#[derive(Clone)]
pub struct Handle(HandleImpl);

impl Handle {
    /// Queues `job` to run on the reactor's thread, after the readiness
    /// batch currently being dispatched (if any) finishes, and wakes the
    /// reactor if it's blocked waiting for I/O.
    pub fn exec(&self, job: impl FnOnce() + Send + 'static) {
        self.0.exec(Box::new(job));
    }

    /// Requests that the owning [`Reactor::run`] return after the current
    /// batch (if any) finishes dispatching.
    pub fn stop(&self) {
        self.0.stop();
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}
