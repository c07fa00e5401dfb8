//! TCP handle types, per-source op state, and socket plumbing.
//!
//! Sockets are built through `socket2` so the options the proxy relies on
//! (`SO_REUSEADDR` on listeners, `TCP_NODELAY` everywhere) are set before
//! the fd ever reaches the poller. The surface is IPv4 only.

use std::cell::RefCell;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::rc::Rc;

use socket2::{Domain, Protocol, Socket, Type};

const LISTEN_BACKLOG: i32 = 128;

/// Caller-owned byte buffer shared with an in-flight operation, the way a
/// script heap array is shared with the native layer.
pub type SharedBuf = Rc<RefCell<Vec<u8>>>;

/// Handle to an open TCP connection owned by a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnection {
    pub(super) key: usize,
    pub(super) generation: u32,
}

/// Handle to a bound, listening TCP server socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpServer {
    pub(super) key: usize,
    pub(super) generation: u32,
}

/// Completion for `read`/`write`: a byte count (read: `-1` end of stream,
/// `0` error; write: `0` error).
pub(super) type IoCallback = Box<dyn FnOnce(i32)>;
/// Completion for `open_connection`/`accept`.
pub(super) type ConnectCallback = Box<dyn FnOnce(Option<TcpConnection>)>;

pub(super) struct ReadOp {
    pub(super) buf: SharedBuf,
    pub(super) off: usize,
    pub(super) len: usize,
    pub(super) callback: IoCallback,
}

pub(super) struct WriteOp {
    /// Byte count of the immediate write attempt, delivered once the OS
    /// reports the socket writable.
    pub(super) written: i32,
    pub(super) callback: IoCallback,
}

pub(super) enum SourceKind {
    Conn {
        stream: TcpStream,
        read: Option<ReadOp>,
        write: Option<WriteOp>,
    },
    Server {
        listener: TcpListener,
        accept: Option<ConnectCallback>,
    },
}

pub(super) struct Source {
    pub(super) kind: SourceKind,
    pub(super) generation: u32,
}

impl Source {
    /// Desired poller interest, derived from the pending ops.
    pub(super) fn interest(&self) -> (bool, bool) {
        match &self.kind {
            SourceKind::Conn { read, write, .. } => (read.is_some(), write.is_some()),
            SourceKind::Server { accept, .. } => (accept.is_some(), false),
        }
    }
}

/// Binds a non-blocking IPv4 listener on `port`; `local_only` restricts
/// it to the loopback interface.
pub(super) fn bind_listener(port: u16, local_only: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let ip = if local_only {
        Ipv4Addr::LOCALHOST
    } else {
        Ipv4Addr::UNSPECIFIED
    };
    socket.bind(&SocketAddr::from((ip, port)).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Applies the connection options every reactor-owned stream carries.
pub(super) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)
}

/// Resolves `host` and connects; runs on a pool worker, so blocking here
/// is fine. IPv4 candidates are tried in resolver order.
pub(super) fn blocking_connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let addrs = (host, port).to_socket_addrs()?;
    let mut last_err = None;
    for addr in addrs.filter(SocketAddr::is_ipv4) {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                configure_stream(&stream)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address for host")))
}
