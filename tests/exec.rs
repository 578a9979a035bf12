mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_net::Reactor;

use support::pump;

#[test]
fn exec_from_another_thread_wakes_the_reactor() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.exec(move || {
            flag.store(true, Ordering::SeqCst);
        });
    });

    pump(&mut reactor, Duration::from_secs(5), || ran.load(Ordering::SeqCst));
    worker.join().unwrap();
}

#[test]
fn stop_ends_the_run_loop() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.stop();
    });

    // `run` blocks until `stop` is called; if it never returns, the test
    // process hangs and the harness kills it.
    reactor.run().unwrap();
    worker.join().unwrap();
}
