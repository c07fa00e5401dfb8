//! Per-heap asynchronous I/O reactor.
//!
//! One reactor serves one script heap: TCP clients and servers, one-shot
//! timers, and a single-threaded dispatch loop that delivers completions
//! into stored callbacks. Blocking work (DNS, `connect`) runs on the
//! shared worker pool; workers hand back a result through a mutex-guarded
//! FIFO and wake the poller, never touching reactor state directly.
//!
//! The kernel wait primitive is the `polling` crate's readiness poller in
//! oneshot mode: interest is re-armed from the pending ops after every
//! delivery, which is also what enforces the one-read/one-write-in-flight
//! rule cheaply.
//!
//! Callbacks that panic are logged and dispatch continues; a callback
//! fault never tears down the loop.

mod tcp;
mod timer;
mod workers;

pub use tcp::{SharedBuf, TcpConnection, TcpServer};

use crate::clock;
use crate::error::{Result, RuntimeError};
use crate::heap::Value;
use parking_lot::{Condvar, Mutex};
use polling::{Event, Events, Poller};
use slab::Slab;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tcp::{ConnectCallback, IoCallback, ReadOp, Source, SourceKind, WriteOp};

struct ThreadResult {
    op: u64,
    result: io::Result<TcpStream>,
}

/// Event list handed from the hidden wait thread to the foreign loop's
/// dispatch call.
struct BridgeSlot {
    events: Vec<(usize, bool, bool)>,
    pending: bool,
}

struct Bridge {
    slot: Mutex<BridgeSlot>,
    drained: Condvar,
}

struct State {
    sources: Slab<Source>,
    timers: timer::TimerHeap,
    connects: hashbrown::HashMap<u64, ConnectCallback>,
    next_op: u64,
    next_generation: u32,
    quit: Option<Value>,
    foreign_mode: bool,
}

struct Shared {
    poller: Arc<Poller>,
    state: RefCell<State>,
    results: Arc<Mutex<VecDeque<ThreadResult>>>,
    foreign: RefCell<Option<Arc<Bridge>>>,
    shutdown: Arc<AtomicBool>,
    /// Earliest absolute timer deadline, mirrored for the hidden wait
    /// thread in foreign-loop mode.
    earliest_deadline: Arc<Mutex<Option<u64>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.poller.notify();
        if let Some(bridge) = self.foreign.borrow().as_ref() {
            let mut slot = bridge.slot.lock();
            slot.pending = false;
            bridge.drained.notify_all();
        }
        let state = self.state.borrow();
        for (_, source) in &state.sources {
            match &source.kind {
                SourceKind::Conn { stream, .. } => {
                    let _ = self.poller.delete(stream);
                }
                SourceKind::Server { listener, .. } => {
                    let _ = self.poller.delete(listener);
                }
            }
        }
    }
}

/// The per-heap event loop. Cloning is cheap and shares the loop.
#[derive(Clone)]
pub struct Reactor {
    shared: Rc<Shared>,
}

fn guard_callback(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("reactor callback panicked; dispatch continues");
    }
}

impl Reactor {
    /// Creates a reactor with its kernel poller.
    pub fn new() -> Result<Self> {
        Ok(Self {
            shared: Rc::new(Shared {
                poller: Arc::new(Poller::new()?),
                state: RefCell::new(State {
                    sources: Slab::new(),
                    timers: timer::TimerHeap::new(),
                    connects: hashbrown::HashMap::new(),
                    next_op: 0,
                    next_generation: 0,
                    quit: None,
                    foreign_mode: false,
                }),
                results: Arc::new(Mutex::new(VecDeque::new())),
                foreign: RefCell::new(None),
                shutdown: Arc::new(AtomicBool::new(false)),
                earliest_deadline: Arc::new(Mutex::new(None)),
            }),
        })
    }

    // ----- registration helpers --------------------------------------------

    #[allow(unsafe_code)]
    fn register_source(&self, state: &mut State, kind: SourceKind) -> Result<(usize, u32)> {
        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);
        let key = state.sources.insert(Source { kind, generation });
        let added = match &state.sources[key].kind {
            // SAFETY: every source is removed from the poller before its
            // socket drops, in `close`/`close_server` and in `Shared::drop`.
            SourceKind::Conn { stream, .. } => unsafe {
                self.shared.poller.add(stream, Event::none(key))
            },
            SourceKind::Server { listener, .. } => unsafe {
                self.shared.poller.add(listener, Event::none(key))
            },
        };
        if let Err(err) = added {
            state.sources.remove(key);
            return Err(err.into());
        }
        Ok((key, generation))
    }

    fn update_interest(&self, state: &State, key: usize) {
        let Some(source) = state.sources.get(key) else {
            return;
        };
        let event = match source.interest() {
            (true, true) => Event::all(key),
            (true, false) => Event::readable(key),
            (false, true) => Event::writable(key),
            (false, false) => Event::none(key),
        };
        let res = match &source.kind {
            SourceKind::Conn { stream, .. } => self.shared.poller.modify(stream, event),
            SourceKind::Server { listener, .. } => self.shared.poller.modify(listener, event),
        };
        if let Err(err) = res {
            tracing::warn!(key, %err, "can't update poller interest");
        }
    }

    fn conn_source<'a>(
        &self,
        state: &'a mut State,
        conn: TcpConnection,
    ) -> Result<&'a mut Source> {
        let source = state
            .sources
            .get_mut(conn.key)
            .filter(|s| s.generation == conn.generation)
            .ok_or_else(|| RuntimeError::invalid_access("closed connection handle"))?;
        if matches!(source.kind, SourceKind::Server { .. }) {
            return Err(RuntimeError::invalid_access("handle is not a connection"));
        }
        Ok(source)
    }

    // ----- public contract -------------------------------------------------

    /// Starts a connection attempt; `callback` later receives the open
    /// connection, or `None` when resolution or connect failed. Never
    /// blocks: DNS and `connect` run on the worker pool.
    pub fn open_connection(
        &self,
        host: &str,
        port: u16,
        callback: impl FnOnce(Option<TcpConnection>) + 'static,
    ) {
        let op = {
            let mut state = self.shared.state.borrow_mut();
            let op = state.next_op;
            state.next_op += 1;
            state.connects.insert(op, Box::new(callback));
            op
        };
        let results = Arc::clone(&self.shared.results);
        let poller = Arc::clone(&self.shared.poller);
        let host = host.to_owned();
        workers::spawn_blocking(Box::new(move || {
            let result = tcp::blocking_connect(&host, port);
            results.lock().push_back(ThreadResult { op, result });
            let _ = poller.notify();
        }));
    }

    /// Binds and listens; the accept loop is armed by [`Reactor::accept`].
    pub fn create_server(&self, port: u16, local_only: bool) -> Result<TcpServer> {
        let listener = tcp::bind_listener(port, local_only)?;
        let mut state = self.shared.state.borrow_mut();
        let (key, generation) = self.register_source(
            &mut state,
            SourceKind::Server {
                listener,
                accept: None,
            },
        )?;
        Ok(TcpServer { key, generation })
    }

    /// Port the server is bound to (useful with port 0).
    pub fn server_port(&self, server: TcpServer) -> Result<u16> {
        let state = self.shared.state.borrow();
        let source = state
            .sources
            .get(server.key)
            .filter(|s| s.generation == server.generation)
            .ok_or_else(|| RuntimeError::invalid_access("closed server handle"))?;
        match &source.kind {
            SourceKind::Server { listener, .. } => Ok(listener.local_addr()?.port()),
            SourceKind::Conn { .. } => Err(RuntimeError::invalid_access("handle is not a server")),
        }
    }

    /// Arms one accept; the callback receives one connection, and the
    /// listener stays quiet until the next `accept` call.
    pub fn accept(
        &self,
        server: TcpServer,
        callback: impl FnOnce(Option<TcpConnection>) + 'static,
    ) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let source = state
            .sources
            .get_mut(server.key)
            .filter(|s| s.generation == server.generation)
            .ok_or_else(|| RuntimeError::invalid_access("closed server handle"))?;
        match &mut source.kind {
            SourceKind::Server { accept, .. } => {
                if accept.is_some() {
                    return Err(RuntimeError::invalid_access("accept already in progress"));
                }
                *accept = Some(Box::new(callback));
            }
            SourceKind::Conn { .. } => {
                return Err(RuntimeError::invalid_access("handle is not a server"))
            }
        }
        self.update_interest(&state, server.key);
        Ok(())
    }

    /// Registers a read of up to `len` bytes into `buf[off..]`. The
    /// callback receives the byte count, `-1` at end of stream, or `0` on
    /// error. At most one read may be in flight per connection.
    pub fn read(
        &self,
        conn: TcpConnection,
        buf: SharedBuf,
        off: usize,
        len: usize,
        callback: impl FnOnce(i32) + 'static,
    ) -> Result<()> {
        let end = off
            .checked_add(len)
            .ok_or(RuntimeError::OutOfBounds("read buffer range"))?;
        if end > buf.borrow().len() {
            return Err(RuntimeError::OutOfBounds("read buffer range"));
        }
        let mut state = self.shared.state.borrow_mut();
        let source = self.conn_source(&mut state, conn)?;
        match &mut source.kind {
            SourceKind::Conn { read, .. } => {
                if read.is_some() {
                    return Err(RuntimeError::invalid_access("read already in progress"));
                }
                *read = Some(ReadOp {
                    buf,
                    off,
                    len,
                    callback: Box::new(callback),
                });
            }
            SourceKind::Server { .. } => unreachable!("conn_source rejects servers"),
        }
        self.update_interest(&state, conn.key);
        Ok(())
    }

    /// Registers a write of `buf[off..off + len]`. The write is attempted
    /// immediately; the byte count (possibly 0) is delivered once the OS
    /// reports the socket writable. At most one write may be in flight
    /// per connection.
    pub fn write(
        &self,
        conn: TcpConnection,
        buf: &SharedBuf,
        off: usize,
        len: usize,
        callback: impl FnOnce(i32) + 'static,
    ) -> Result<()> {
        let end = off
            .checked_add(len)
            .ok_or(RuntimeError::OutOfBounds("write buffer range"))?;
        if end > buf.borrow().len() {
            return Err(RuntimeError::OutOfBounds("write buffer range"));
        }
        let mut state = self.shared.state.borrow_mut();
        let source = self.conn_source(&mut state, conn)?;
        match &mut source.kind {
            SourceKind::Conn { stream, write, .. } => {
                if write.is_some() {
                    return Err(RuntimeError::invalid_access("write already in progress"));
                }
                let written = {
                    use std::io::Write;
                    let data = buf.borrow();
                    match (&*stream).write(&data[off..off + len]) {
                        Ok(n) => n as i32,
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
                        Err(err) => {
                            tracing::debug!(%err, "immediate write failed");
                            0
                        }
                    }
                };
                *write = Some(WriteOp {
                    written,
                    callback: Box::new(callback),
                });
            }
            SourceKind::Server { .. } => unreachable!("conn_source rejects servers"),
        }
        self.update_interest(&state, conn.key);
        Ok(())
    }

    /// Cancels any in-flight ops and closes the socket. Callbacks
    /// registered on the handle are never invoked afterwards.
    pub fn close(&self, conn: TcpConnection) {
        let mut state = self.shared.state.borrow_mut();
        let valid = state
            .sources
            .get(conn.key)
            .is_some_and(|s| s.generation == conn.generation);
        if !valid {
            return;
        }
        let source = state.sources.remove(conn.key);
        // deregister before the socket drops so a late event can't alias
        // a recycled key
        if let SourceKind::Conn { stream, .. } = &source.kind {
            let _ = self.shared.poller.delete(stream);
        }
    }

    /// Closes a server socket; a parked accept callback is dropped.
    pub fn close_server(&self, server: TcpServer) {
        let mut state = self.shared.state.borrow_mut();
        let valid = state
            .sources
            .get(server.key)
            .is_some_and(|s| s.generation == server.generation);
        if !valid {
            return;
        }
        let source = state.sources.remove(server.key);
        if let SourceKind::Server { listener, .. } = &source.kind {
            let _ = self.shared.poller.delete(listener);
        }
    }

    /// Schedules `callback` after `delay_ms`; zero delay runs on the next
    /// dispatch turn before any I/O wait.
    pub fn run_later(&self, delay_ms: u32, callback: impl FnOnce() + 'static) {
        let now = clock::monotonic_time_ms();
        {
            let mut state = self.shared.state.borrow_mut();
            state.timers.insert(now, delay_ms, Box::new(callback));
        }
        self.refresh_deadline();
        // a parked wait (built-in or hidden thread) must observe the new
        // deadline
        let _ = self.shared.poller.notify();
    }

    /// Sets the quit flag; the next [`Reactor::process`] turn returns
    /// `value` instead of waiting.
    pub fn quit(&self, value: Value) {
        self.shared.state.borrow_mut().quit = Some(value);
        let _ = self.shared.poller.notify();
    }

    /// Runs one event-wait-and-dispatch cycle.
    ///
    /// A negative timeout blocks until something happens; a non-negative
    /// timeout bounds the wait and the call returns after the round
    /// either way. Returns the value passed to [`Reactor::quit`] once the
    /// flag is set.
    pub fn process(&self, timeout_ms: i64) -> Result<Option<Value>> {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.foreign_mode {
                return Err(RuntimeError::invalid_access(
                    "built-in loop is disabled while a foreign loop is integrated",
                ));
            }
            if let Some(value) = state.quit.take() {
                return Ok(Some(value));
            }
        }

        self.run_due_timers();
        self.drain_thread_results();

        let now = clock::monotonic_time_ms();
        let timer_delay = self.shared.state.borrow().timers.next_delay(now);
        let user = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };
        let wait = match (user, timer_delay) {
            (Some(u), Some(t)) => Some(u.min(t)),
            (u, t) => u.or(t),
        };

        let mut events = Events::new();
        if let Err(err) = self.shared.poller.wait(&mut events, wait) {
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
        let list: Vec<(usize, bool, bool)> =
            events.iter().map(|e| (e.key, e.readable, e.writable)).collect();
        self.dispatch_events(&list);
        self.drain_thread_results();
        self.run_due_timers();
        Ok(None)
    }

    // ----- foreign loop bridge ---------------------------------------------

    /// Delegates waiting to a hidden thread that signals `notify` when
    /// events are pending; the foreign loop then calls
    /// [`Reactor::process_events`] on the heap's thread. The built-in
    /// [`Reactor::process`] becomes forbidden.
    pub fn integrate_loop(&self, notify: impl Fn() + Send + 'static) -> Result<()> {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.foreign_mode {
                return Err(RuntimeError::invalid_access("foreign loop already integrated"));
            }
            state.foreign_mode = true;
        }
        let bridge = Arc::new(Bridge {
            slot: Mutex::new(BridgeSlot {
                events: Vec::new(),
                pending: false,
            }),
            drained: Condvar::new(),
        });
        *self.shared.foreign.borrow_mut() = Some(Arc::clone(&bridge));

        let poller = Arc::clone(&self.shared.poller);
        let shutdown = Arc::clone(&self.shared.shutdown);
        let earliest = Arc::clone(&self.shared.earliest_deadline);
        std::thread::Builder::new()
            .name("bedrock-reactor-wait".into())
            .spawn(move || {
                let mut events = Events::new();
                loop {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    let deadline = *earliest.lock();
                    let wait = deadline.map(|deadline| {
                        Duration::from_millis(
                            deadline.saturating_sub(clock::monotonic_time_ms()),
                        )
                    });
                    events.clear();
                    let _ = poller.wait(&mut events, wait);
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    {
                        let mut slot = bridge.slot.lock();
                        slot.events
                            .extend(events.iter().map(|e| (e.key, e.readable, e.writable)));
                        slot.pending = true;
                    }
                    notify();
                    let mut slot = bridge.slot.lock();
                    while slot.pending {
                        bridge.drained.wait(&mut slot);
                    }
                }
            })?;
        Ok(())
    }

    /// Dispatches everything the hidden thread collected; called by the
    /// foreign loop on the heap's thread after a notify.
    pub fn process_events(&self) -> Result<()> {
        let bridge = self
            .shared
            .foreign
            .borrow()
            .clone()
            .ok_or_else(|| RuntimeError::invalid_access("no foreign loop integrated"))?;
        let events = {
            let mut slot = bridge.slot.lock();
            let events = std::mem::take(&mut slot.events);
            slot.pending = false;
            bridge.drained.notify_all();
            events
        };
        self.dispatch_events(&events);
        self.drain_thread_results();
        self.run_due_timers();
        Ok(())
    }

    // ----- dispatch --------------------------------------------------------

    fn refresh_deadline(&self) {
        let now = clock::monotonic_time_ms();
        let next = self
            .shared
            .state
            .borrow()
            .timers
            .next_delay(now)
            .map(|d| now + d.as_millis() as u64);
        *self.shared.earliest_deadline.lock() = next;
    }

    fn run_due_timers(&self) {
        let now = clock::monotonic_time_ms();
        let due = self.shared.state.borrow_mut().timers.pop_due(now);
        for callback in due {
            guard_callback(callback);
        }
        self.refresh_deadline();
    }

    fn drain_thread_results(&self) {
        loop {
            let item = self.shared.results.lock().pop_front();
            let Some(ThreadResult { op, result }) = item else {
                return;
            };
            let callback = self.shared.state.borrow_mut().connects.remove(&op);
            let Some(callback) = callback else { continue };
            match result {
                Ok(stream) => {
                    let registered = {
                        let mut state = self.shared.state.borrow_mut();
                        self.register_source(
                            &mut state,
                            SourceKind::Conn {
                                stream,
                                read: None,
                                write: None,
                            },
                        )
                    };
                    match registered {
                        Ok((key, generation)) => {
                            let conn = TcpConnection { key, generation };
                            guard_callback(move || callback(Some(conn)));
                        }
                        Err(err) => {
                            tracing::debug!(%err, "can't register connected stream");
                            guard_callback(move || callback(None));
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(%err, "connect failed");
                    guard_callback(move || callback(None));
                }
            }
        }
    }

    fn dispatch_events(&self, events: &[(usize, bool, bool)]) {
        enum Action {
            Io(IoCallback, i32),
            Connect(ConnectCallback, Option<TcpConnection>),
        }

        let mut actions: Vec<Action> = Vec::new();
        {
            let mut state = self.shared.state.borrow_mut();
            let mut accepted: Vec<(ConnectCallback, io::Result<TcpStream>)> = Vec::new();

            for &(key, readable, writable) in events {
                let Some(source) = state.sources.get_mut(key) else {
                    // closed while the event was in flight
                    continue;
                };
                match &mut source.kind {
                    SourceKind::Conn { stream, read, write } => {
                        if readable {
                            if let Some(op) = read.take() {
                                use std::io::Read;
                                let res = {
                                    let mut data = op.buf.borrow_mut();
                                    (&*stream).read(&mut data[op.off..op.off + op.len])
                                };
                                match res {
                                    Ok(0) => actions.push(Action::Io(op.callback, -1)),
                                    Ok(n) => actions.push(Action::Io(op.callback, n as i32)),
                                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                        *read = Some(op);
                                    }
                                    Err(err) => {
                                        tracing::debug!(%err, "read failed");
                                        actions.push(Action::Io(op.callback, 0));
                                    }
                                }
                            }
                        }
                        if writable {
                            if let Some(op) = write.take() {
                                actions.push(Action::Io(op.callback, op.written));
                            }
                        }
                    }
                    SourceKind::Server { listener, accept } => {
                        if readable {
                            if let Some(callback) = accept.take() {
                                match listener.accept() {
                                    Ok((stream, _addr)) => accepted.push((callback, Ok(stream))),
                                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                        *accept = Some(callback);
                                    }
                                    Err(err) => accepted.push((callback, Err(err))),
                                }
                            }
                        }
                    }
                }
                self.update_interest(&state, key);
            }

            for (callback, result) in accepted {
                let conn = result
                    .and_then(|stream| {
                        tcp::configure_stream(&stream)?;
                        Ok(stream)
                    })
                    .and_then(|stream| {
                        self.register_source(
                            &mut state,
                            SourceKind::Conn {
                                stream,
                                read: None,
                                write: None,
                            },
                        )
                        .map_err(|err| io::Error::other(err.to_string()))
                    });
                match conn {
                    Ok((key, generation)) => actions.push(Action::Connect(
                        callback,
                        Some(TcpConnection { key, generation }),
                    )),
                    Err(err) => {
                        tracing::debug!(%err, "accept failed");
                        actions.push(Action::Connect(callback, None));
                    }
                }
            }
        }

        for action in actions {
            match action {
                Action::Io(callback, n) => guard_callback(move || callback(n)),
                Action::Connect(callback, conn) => guard_callback(move || callback(conn)),
            }
        }
    }
}
