mod support;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use reactor_net::{Reactor, Timer};

use support::pump;

#[test]
fn timer_fires_once_after_delay() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(0u32));
    let counter = fired.clone();
    let _timer = Timer::after(&reactor, 20, move |_t| {
        *counter.borrow_mut() += 1;
    })
    .unwrap();

    pump(&mut reactor, Duration::from_secs(2), || *fired.borrow() > 0);
    assert_eq!(*fired.borrow(), 1);

    // A few more spins must not re-fire the one-shot timer.
    for _ in 0..5 {
        reactor.run_once(Some(Duration::from_millis(10))).unwrap();
    }
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn cancelled_timer_never_fires() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(false));
    let flag = fired.clone();
    let mut timer = Timer::after(&reactor, 50, move |_t| {
        *flag.borrow_mut() = true;
    })
    .unwrap();

    timer.cancel();
    assert!(!timer.is_pending());

    for _ in 0..5 {
        reactor.run_once(Some(Duration::from_millis(30))).unwrap();
    }
    assert!(!*fired.borrow());
}
