mod support;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use reactor_net::{AsyncSocket, Callbacks, Reactor, SocketConfig};

use support::pump;

/// A listener that accepts but never reads, paired with a client whose
/// pending-write buffer has a tiny high-water mark: writing more than the
/// kernel will take in one go must eventually report the configured
/// `on_error` instead of growing the queue without bound.
#[test]
fn write_high_water_mark_reports_error_instead_of_growing_unbounded() {
    support::init();
    let mut reactor = Reactor::new().unwrap();

    let accepted = Rc::new(RefCell::new(Vec::new()));
    let keep_alive = accepted.clone();
    let listener_callbacks = Callbacks::new().on_accepted(move |_listener, client| {
        // Never registers on_received; the peer's send buffer fills and
        // the client's pending-write queue has nowhere to drain to.
        keep_alive.borrow_mut().push(client);
    });
    let mut listener = AsyncSocket::tcp_listener(&reactor, false, listener_callbacks).unwrap();
    listener.bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
    listener.listen(128).unwrap();
    let addr = listener.local_addr().unwrap();

    let errored = Rc::new(RefCell::new(false));
    let flag = errored.clone();
    let config = SocketConfig {
        write_high_water_mark: Some(4096),
        ..SocketConfig::default()
    };
    let callbacks = Callbacks::new()
        .on_connected(|sock| {
            let chunk = vec![0xABu8; 64 * 1024];
            for _ in 0..64 {
                sock.write(&chunk);
            }
        })
        .on_error(move |_sock, _code, _message, hint| {
            if hint == "write" {
                *flag.borrow_mut() = true;
            }
        });
    let mut client =
        AsyncSocket::raw_with_config(&reactor, libc_af_inet(), libc_sock_stream(), 0, callbacks, config)
            .unwrap();
    client.connect(&addr).unwrap();

    pump(&mut reactor, Duration::from_secs(5), || *errored.borrow());
    assert!(*errored.borrow());
}

#[cfg(unix)]
fn libc_af_inet() -> i32 {
    libc::AF_INET
}
#[cfg(unix)]
fn libc_sock_stream() -> i32 {
    libc::SOCK_STREAM
}

#[cfg(windows)]
fn libc_af_inet() -> i32 {
    windows_sys::Win32::Networking::WinSock::AF_INET as i32
}
#[cfg(windows)]
fn libc_sock_stream() -> i32 {
    windows_sys::Win32::Networking::WinSock::SOCK_STREAM as i32
}
