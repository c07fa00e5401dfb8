//! Reactor end-to-end suites: the echo scenario across two reactors
//! (one per script heap, both driven from this thread), cancellation
//! after close, and connect failure delivery.

use bedrock::heap::Value;
use bedrock::reactor::{Reactor, SharedBuf, TcpConnection};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn new_buf(len: usize) -> SharedBuf {
    Rc::new(RefCell::new(vec![0u8; len]))
}

/// Pumps both reactors until `done` reports true.
fn drive(reactors: &[&Reactor], done: &dyn Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "scenario timed out");
        for r in reactors {
            r.process(20).unwrap();
        }
    }
}

/// One echo turn on the server side: read, then write back what came in,
/// then arm the next read.
fn arm_echo(reactor: &Reactor, conn: TcpConnection) {
    let buf = new_buf(512);
    let r = reactor.clone();
    let b = Rc::clone(&buf);
    reactor
        .read(conn, Rc::clone(&buf), 0, 512, move |n| {
            if n <= 0 {
                r.close(conn);
                return;
            }
            let r2 = r.clone();
            let wbuf = Rc::clone(&b);
            r.write(conn, &wbuf, 0, n as usize, move |_| {
                arm_echo(&r2, conn);
            })
            .unwrap();
        })
        .unwrap();
}

#[test]
fn echo_roundtrip_between_two_heaps() {
    // server heap
    let server_reactor = Reactor::new().unwrap();
    let server = server_reactor.create_server(0, true).unwrap();
    let port = server_reactor.server_port(server).unwrap();
    {
        let r = server_reactor.clone();
        server_reactor
            .accept(server, move |conn| {
                if let Some(conn) = conn {
                    arm_echo(&r, conn);
                }
            })
            .unwrap();
    }

    // client heap
    let client_reactor = Reactor::new().unwrap();
    let response: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
    {
        let r = client_reactor.clone();
        let response = Rc::clone(&response);
        client_reactor.open_connection("127.0.0.1", port, move |conn| {
            let conn = conn.expect("connect must succeed");
            let wbuf: SharedBuf = Rc::new(RefCell::new(b"ping\n".to_vec()));
            let r2 = r.clone();
            r.write(conn, &wbuf, 0, 5, move |written| {
                assert_eq!(written, 5);
                let rbuf = new_buf(64);
                let rb = Rc::clone(&rbuf);
                let response = Rc::clone(&response);
                r2.read(conn, rbuf, 0, 64, move |n| {
                    assert!(n > 0);
                    let data = rb.borrow()[..n as usize].to_vec();
                    *response.borrow_mut() = Some(data);
                })
                .unwrap();
            })
            .unwrap();
        });
    }

    let done = {
        let response = Rc::clone(&response);
        move || response.borrow().is_some()
    };
    drive(&[&server_reactor, &client_reactor], &done);
    assert_eq!(response.borrow().as_deref(), Some(&b"ping\n"[..]));
}

#[test]
fn connect_failure_delivers_null() {
    // bind-then-drop leaves a port that refuses connections
    let port = {
        let r = Reactor::new().unwrap();
        let s = r.create_server(0, true).unwrap();
        let port = r.server_port(s).unwrap();
        r.close_server(s);
        port
    };

    let reactor = Reactor::new().unwrap();
    let outcome: Rc<RefCell<Option<Option<TcpConnection>>>> = Rc::new(RefCell::new(None));
    {
        let outcome = Rc::clone(&outcome);
        reactor.open_connection("127.0.0.1", port, move |conn| {
            *outcome.borrow_mut() = Some(conn);
        });
    }
    let done = {
        let outcome = Rc::clone(&outcome);
        move || outcome.borrow().is_some()
    };
    drive(&[&reactor], &done);
    assert_eq!(*outcome.borrow(), Some(None));
}

#[test]
fn no_callback_after_close() {
    let server_reactor = Reactor::new().unwrap();
    let server = server_reactor.create_server(0, true).unwrap();
    let port = server_reactor.server_port(server).unwrap();

    let server_conn: Rc<RefCell<Option<TcpConnection>>> = Rc::new(RefCell::new(None));
    {
        let slot = Rc::clone(&server_conn);
        server_reactor
            .accept(server, move |conn| {
                *slot.borrow_mut() = conn;
            })
            .unwrap();
    }

    let client_reactor = Reactor::new().unwrap();
    let client_conn: Rc<RefCell<Option<TcpConnection>>> = Rc::new(RefCell::new(None));
    {
        let slot = Rc::clone(&client_conn);
        client_reactor.open_connection("127.0.0.1", port, move |conn| {
            *slot.borrow_mut() = conn;
        });
    }
    let done = {
        let a = Rc::clone(&server_conn);
        let b = Rc::clone(&client_conn);
        move || a.borrow().is_some() && b.borrow().is_some()
    };
    drive(&[&server_reactor, &client_reactor], &done);

    // register a read on the client side, then close before the peer
    // sends anything
    let fired = Rc::new(RefCell::new(false));
    let conn = client_conn.borrow().unwrap();
    {
        let fired = Rc::clone(&fired);
        let buf = new_buf(16);
        client_reactor
            .read(conn, buf, 0, 16, move |_| {
                *fired.borrow_mut() = true;
            })
            .unwrap();
    }
    client_reactor.close(conn);

    // now make the peer send; the closed handle's callback must stay
    // silent through several dispatch turns
    let sconn = server_conn.borrow().unwrap();
    let data: SharedBuf = Rc::new(RefCell::new(b"late".to_vec()));
    let _ = server_reactor.write(sconn, &data, 0, 4, |_| {});
    for _ in 0..10 {
        server_reactor.process(20).unwrap();
        client_reactor.process(20).unwrap();
    }
    assert!(!*fired.borrow(), "callback fired after close");

    // the closed handle is rejected synchronously afterwards
    assert!(client_reactor.read(conn, new_buf(4), 0, 4, |_| {}).is_err());
}

#[test]
fn accept_rearms_only_on_next_call() {
    let reactor = Reactor::new().unwrap();
    let server = reactor.create_server(0, true).unwrap();
    let port = reactor.server_port(server).unwrap();

    let hits = Rc::new(RefCell::new(0u32));
    {
        let hits = Rc::clone(&hits);
        reactor
            .accept(server, move |conn| {
                assert!(conn.is_some());
                *hits.borrow_mut() += 1;
            })
            .unwrap();
    }

    let _c1 = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    let _c2 = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();

    let done = {
        let hits = Rc::clone(&hits);
        move || *hits.borrow() >= 1
    };
    drive(&[&reactor], &done);

    // extra turns must not deliver the second connection unasked
    for _ in 0..5 {
        reactor.process(20).unwrap();
    }
    assert_eq!(*hits.borrow(), 1);

    // the next accept call picks up the queued connection
    {
        let hits = Rc::clone(&hits);
        reactor
            .accept(server, move |conn| {
                assert!(conn.is_some());
                *hits.borrow_mut() += 1;
            })
            .unwrap();
    }
    let done = {
        let hits = Rc::clone(&hits);
        move || *hits.borrow() >= 2
    };
    drive(&[&reactor], &done);
}

#[test]
fn quit_breaks_a_process_loop() {
    let reactor = Reactor::new().unwrap();
    {
        let r = reactor.clone();
        reactor.run_later(10, move || r.quit(Value::Int(99)));
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    let result = loop {
        assert!(Instant::now() < deadline, "quit never surfaced");
        if let Some(v) = reactor.process(-1).unwrap() {
            break v;
        }
    };
    assert_eq!(result, Value::Int(99));
}
