//! A single-shot timer fired from the owning [`Reactor`]'s thread.

use crate::error::Error;
use crate::reactor::Reactor;
use crate::sys::TimerImpl;

/// A one-shot timer. Dropping it (or calling [`Timer::cancel`]) before it
/// fires cancels the pending callback.
pub struct Timer(Box<TimerImpl>);

impl Timer {
    /// Schedules `callback` to run once, after `millis` milliseconds, on
    /// the reactor's thread.
    pub fn after(
        reactor: &Reactor,
        millis: u64,
        callback: impl FnMut(&mut Timer) + 'static,
    ) -> Result<Timer, Error> {
        let imp = reactor.impl_ref().new_timer(millis, Box::new(callback))?;
        Ok(Timer(imp))
    }

    pub fn cancel(&mut self) {
        self.0.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_pending()
    }

    pub(crate) fn from_impl(imp: Box<TimerImpl>) -> Timer {
        Timer(imp)
    }

    pub(crate) fn impl_mut(&mut self) -> &mut TimerImpl {
        &mut self.0
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").field("pending", &self.is_pending()).finish()
    }
}
