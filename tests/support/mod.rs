use std::sync::Once;
use std::time::{Duration, Instant};

use reactor_net::Reactor;

static LOG_INIT: Once = Once::new();

/// Initializes `env_logger` once per test binary so `RUST_LOG=trace cargo
/// test` shows reactor-internal diagnostics.
pub fn init() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Pumps `reactor` until `done` returns true or `timeout` elapses.
/// Panics on timeout so a stuck scenario fails loudly instead of hanging
/// the test suite.
pub fn pump(reactor: &mut Reactor, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            panic!("scenario did not complete within {:?}", timeout);
        }
        reactor
            .run_once(Some(Duration::from_millis(20)))
            .expect("reactor dispatch failed");
    }
}
