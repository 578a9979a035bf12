mod support;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use rand::RngCore;
use reactor_net::{AsyncSocket, Callbacks, Reactor};

use support::pump;

/// Accepted connections are kept alive by the shared `accepted` vec so
/// they aren't dropped (and closed) the moment `on_accepted` returns.
fn loopback_listener(
    reactor: &Reactor,
    accepted: Rc<RefCell<Vec<AsyncSocket>>>,
) -> (AsyncSocket, SocketAddr) {
    let callbacks = Callbacks::new().on_accepted(move |_listener, mut client| {
        client.set_callbacks(Callbacks::new().on_received(|sock, data| {
            sock.write(data);
        }));
        accepted.borrow_mut().push(client);
    });
    let mut listener = AsyncSocket::tcp_listener(reactor, false, callbacks).unwrap();
    listener.bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
    listener.listen(128).unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[test]
fn echo_small_message() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let accepted = Rc::new(RefCell::new(Vec::new()));
    let (_listener, addr) = loopback_listener(&reactor, accepted);

    let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let store = received.clone();
    let message = b"hello, reactor".to_vec();
    let to_send = message.clone();
    let callbacks = Callbacks::new()
        .on_connected(move |sock| {
            sock.write(&to_send);
        })
        .on_received(move |_sock, data| {
            store.borrow_mut().extend_from_slice(data);
        });
    let mut client = AsyncSocket::tcp_stream(&reactor, false, callbacks).unwrap();
    client.connect(&addr).unwrap();

    pump(&mut reactor, Duration::from_secs(5), || {
        received.borrow().len() >= message.len()
    });

    assert_eq!(&*received.borrow(), &message);
}

#[test]
fn echo_large_message() {
    support::init();
    let mut reactor = Reactor::new().unwrap();
    let accepted = Rc::new(RefCell::new(Vec::new()));
    let (_listener, addr) = loopback_listener(&reactor, accepted);

    let mut message = vec![0u8; 50_000];
    rand::rng().fill_bytes(&mut message);

    let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let store = received.clone();
    let to_send = message.clone();
    let callbacks = Callbacks::new()
        .on_connected(move |sock| {
            sock.write(&to_send);
        })
        .on_received(move |_sock, data| {
            store.borrow_mut().extend_from_slice(data);
        });
    let mut client = AsyncSocket::tcp_stream(&reactor, false, callbacks).unwrap();
    client.connect(&addr).unwrap();

    pump(&mut reactor, Duration::from_secs(10), || {
        received.borrow().len() >= message.len()
    });

    assert_eq!(received.borrow().len(), message.len());
    assert_eq!(&*received.borrow(), &message);
}

#[test]
fn disconnect_fires_on_disconnected() {
    support::init();
    let mut reactor = Reactor::new().unwrap();

    let closed_immediately = Callbacks::new().on_accepted(|_listener, mut client| {
        client.close();
    });
    let mut listener = AsyncSocket::tcp_listener(&reactor, false, closed_immediately).unwrap();
    listener.bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
    listener.listen(128).unwrap();
    let addr = listener.local_addr().unwrap();

    let disconnected = Rc::new(RefCell::new(false));
    let flag = disconnected.clone();
    let callbacks = Callbacks::new().on_disconnected(move |_sock| {
        *flag.borrow_mut() = true;
    });
    let mut client = AsyncSocket::tcp_stream(&reactor, false, callbacks).unwrap();
    client.connect(&addr).unwrap();

    pump(&mut reactor, Duration::from_secs(5), || *disconnected.borrow());
    assert!(*disconnected.borrow());
}
