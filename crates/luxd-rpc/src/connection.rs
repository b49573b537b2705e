//! One framed RPC connection over a non-blocking socket.
//!
//! Receive path state machine:
//!
//! ```text
//! AwaitingHeader ──4 bytes──► AwaitingPayload ──size bytes──► dispatch ─┐
//!        ▲                                                             │
//!        └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any unrecognized header version, over-limit declared length, or I/O
//! error moves the connection to `Closed`: the registration is dropped
//! and the handler's `handle_close` runs exactly once. No partial frame
//! is ever dispatched.
//!
//! Send path: header + payload go out as one attempted write. A short
//! write queues the remainder and registers for write readiness until
//! the queue drains (backpressure). Frames are serialized per
//! connection — bytes of two frames never interleave on the wire.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::os::fd::OwnedFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

use thiserror::Error;

use luxd_codec::header::{decode_header, encode_header, PROTOCOL_VERSION};
use luxd_reactor::{HandleOutcome, ReadHandler, SelectServer, WriteHandler};

/// Sanity cap on a frame's declared payload length. The header field can
/// express up to 2^28-1, but nothing the daemon exchanges comes close;
/// anything larger is a protocol error, not a frame to buffer.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Bytes requested from the socket per readiness event.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The connection is closed (peer reset, EOF, or prior error).
    #[error("connection closed")]
    Closed,
    /// Peer spoke a protocol version we do not recognize.
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    /// Declared payload length exceeds [`MAX_FRAME_PAYLOAD`].
    #[error("declared payload of {0} bytes exceeds maximum")]
    Oversized(usize),
    /// Unexpected OS error with errno.
    #[error("os error: errno {0}")]
    Os(i32),
}

/// Application callbacks for one connection.
pub trait RpcHandler {
    /// A complete frame arrived. `tx` queues responses on the same
    /// connection; sends through it obey the usual backpressure rules.
    fn handle_frame(&mut self, payload: &[u8], tx: &mut FrameSender<'_>, ss: &mut SelectServer);

    /// The connection closed (peer EOF/reset or protocol error). Runs
    /// exactly once, after the registration is gone.
    fn handle_close(&mut self, _ss: &mut SelectServer) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitingHeader,
    AwaitingPayload { size: usize },
    Closed,
}

#[inline]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn set_nonblocking(fd: RawFd) -> Result<(), RpcError> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(RpcError::Os(errno()));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(RpcError::Os(errno()));
        }
    }
    Ok(())
}

/// Attempt one non-blocking write. Returns bytes accepted (possibly 0 if
/// the socket is full or the call was interrupted).
fn write_some(fd: RawFd, buf: &[u8]) -> Result<usize, RpcError> {
    let ret = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if ret >= 0 {
        return Ok(ret as usize);
    }
    match errno() {
        libc::EAGAIN | libc::EINTR => Ok(0),
        libc::EPIPE | libc::ECONNRESET => Err(RpcError::Closed),
        err => Err(RpcError::Os(err)),
    }
}

/// Outbound half: the write fd plus the queue of encoded frames not yet
/// accepted by the socket.
struct Outbound {
    fd: RawFd,
    queue: VecDeque<Vec<u8>>,
    /// Bytes of the queue front already written.
    front_written: usize,
}

impl Outbound {
    /// Frame `payload` and hand it to the socket; queue whatever the
    /// socket refuses and arrange for write-readiness callbacks.
    fn send_frame(
        &mut self,
        ss: &mut SelectServer,
        conn: &Weak<RefCell<RpcConnection>>,
        payload: &[u8],
    ) -> Result<(), RpcError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(RpcError::Oversized(payload.len()));
        }
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&encode_header(PROTOCOL_VERSION, payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);

        if !self.queue.is_empty() {
            // Earlier frames are still in flight; keep wire order.
            self.queue.push_back(frame);
            return Ok(());
        }

        let written = write_some(self.fd, &frame)?;
        if written < frame.len() {
            self.front_written = written;
            self.queue.push_back(frame);
            if let Some(rc) = conn.upgrade() {
                ss.add_write_descriptor(self.fd, rc);
            }
        }
        Ok(())
    }

    /// Push queued bytes into the socket. Ok(true) once the queue is
    /// empty.
    fn flush(&mut self) -> Result<bool, RpcError> {
        while let Some(front) = self.queue.front() {
            let written = write_some(self.fd, &front[self.front_written..])?;
            if written == 0 {
                return Ok(false); // still backpressured
            }
            self.front_written += written;
            if self.front_written == front.len() {
                self.queue.pop_front();
                self.front_written = 0;
            }
        }
        Ok(true)
    }

    fn pending_bytes(&self) -> usize {
        self.queue.iter().map(Vec::len).sum::<usize>() - self.front_written
    }
}

/// Queues responses on the connection currently being dispatched.
pub struct FrameSender<'a> {
    out: &'a mut Outbound,
    conn: Weak<RefCell<RpcConnection>>,
    close_pending: &'a mut bool,
}

impl FrameSender<'_> {
    pub fn send(&mut self, ss: &mut SelectServer, payload: &[u8]) -> Result<(), RpcError> {
        self.out.send_frame(ss, &self.conn, payload)
    }

    /// Close the connection once the current dispatch returns. Frames
    /// still in the accumulation buffer are not dispatched; queued output
    /// is dropped; `handle_close` runs exactly once after deregistration.
    ///
    /// This is the one supported way for a handler to close its own
    /// connection — the connection object is borrowed for the duration of
    /// the dispatch, so [`RpcConnection::close`] cannot be called here.
    pub fn close(&mut self) {
        *self.close_pending = true;
    }
}

impl fmt::Debug for FrameSender<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSender")
            .field("fd", &self.out.fd)
            .field("pending_bytes", &self.out.pending_bytes())
            .finish()
    }
}

/// A framed RPC connection bound to a `SelectServer`.
pub struct RpcConnection {
    fd: OwnedFd,
    state: ReadState,
    /// Accumulated inbound bytes not yet consumed as frames.
    buf: Vec<u8>,
    out: Outbound,
    handler: Box<dyn RpcHandler>,
    weak_self: Weak<RefCell<RpcConnection>>,
    close_notified: bool,
    /// Set through [`FrameSender::close`]; honored after dispatch.
    close_pending: bool,
}

impl RpcConnection {
    /// Wrap `fd` (which is switched to non-blocking) with `handler`.
    /// Call [`attach`](Self::attach) to start receiving.
    pub fn new(fd: OwnedFd, handler: Box<dyn RpcHandler>) -> Result<Rc<RefCell<Self>>, RpcError> {
        set_nonblocking(fd.as_raw_fd())?;
        let raw = fd.as_raw_fd();
        let conn = Rc::new(RefCell::new(Self {
            fd,
            state: ReadState::AwaitingHeader,
            buf: Vec::new(),
            out: Outbound {
                fd: raw,
                queue: VecDeque::new(),
                front_written: 0,
            },
            handler,
            weak_self: Weak::new(),
            close_notified: false,
            close_pending: false,
        }));
        conn.borrow_mut().weak_self = Rc::downgrade(&conn);
        Ok(conn)
    }

    /// Register the connection's socket with the reactor. The reactor's
    /// clone of `conn` is dropped when the connection closes; keep a
    /// clone of your own to use the object past that point.
    pub fn attach(conn: &Rc<RefCell<Self>>, ss: &mut SelectServer) -> bool {
        let fd = conn.borrow().out.fd;
        ss.add_read_descriptor(fd, conn.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReadState::Closed
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_output(&self) -> usize {
        self.out.pending_bytes()
    }

    /// Frame and send `payload`. Queued under backpressure; wire order
    /// follows call order.
    pub fn send_frame(&mut self, ss: &mut SelectServer, payload: &[u8]) -> Result<(), RpcError> {
        if self.state == ReadState::Closed {
            return Err(RpcError::Closed);
        }
        let conn = self.weak_self.clone();
        self.out.send_frame(ss, &conn, payload)
    }

    /// Deregister from the reactor and mark closed. Queued output is
    /// dropped.
    ///
    /// Must not be called from this connection's own `handle_frame` — the
    /// connection is borrowed for the duration of the dispatch. Handlers
    /// close their own connection through [`FrameSender::close`].
    pub fn close(&mut self, ss: &mut SelectServer) {
        let fd = self.out.fd;
        ss.remove_read_descriptor(fd);
        ss.remove_write_descriptor(fd);
        self.state = ReadState::Closed;
        self.out.queue.clear();
        self.out.front_written = 0;
        if !self.close_notified {
            self.close_notified = true;
            self.handler.handle_close(ss);
        }
    }

    /// Consume every complete frame in the accumulation buffer.
    fn dispatch_frames(&mut self, ss: &mut SelectServer) -> Result<(), RpcError> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    if self.buf.len() < 4 {
                        return Ok(());
                    }
                    let mut word = [0u8; 4];
                    word.copy_from_slice(&self.buf[..4]);
                    let (version, size) = decode_header(u32::from_be_bytes(word));
                    if version != PROTOCOL_VERSION {
                        return Err(RpcError::BadVersion(version));
                    }
                    let size = size as usize;
                    if size > MAX_FRAME_PAYLOAD {
                        return Err(RpcError::Oversized(size));
                    }
                    self.buf.drain(..4);
                    self.state = ReadState::AwaitingPayload { size };
                }
                ReadState::AwaitingPayload { size } => {
                    if self.buf.len() < size {
                        return Ok(());
                    }
                    let payload: Vec<u8> = self.buf.drain(..size).collect();
                    self.state = ReadState::AwaitingHeader;
                    let Self {
                        handler,
                        out,
                        weak_self,
                        close_pending,
                        ..
                    } = self;
                    let mut tx = FrameSender {
                        out,
                        conn: weak_self.clone(),
                        close_pending,
                    };
                    handler.handle_frame(&payload, &mut tx, ss);
                    if self.close_pending {
                        // Deferred close from the handler: stop dispatching
                        // and drop anything queued. Deregistration and the
                        // close notification ride the Closed outcome.
                        self.close_pending = false;
                        self.state = ReadState::Closed;
                        self.out.queue.clear();
                        self.out.front_written = 0;
                        return Ok(());
                    }
                }
                ReadState::Closed => return Ok(()),
            }
        }
    }
}

impl ReadHandler for RpcConnection {
    fn handle_read(&mut self, ss: &mut SelectServer) -> HandleOutcome {
        if self.state == ReadState::Closed {
            return HandleOutcome::Closed;
        }

        // One read per readiness event; poll is level-triggered, so
        // anything left in the socket re-arms immediately.
        let mut chunk = [0u8; READ_CHUNK];
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                chunk.as_mut_ptr() as *mut libc::c_void,
                chunk.len(),
            )
        };
        if n == 0 {
            self.state = ReadState::Closed;
            return HandleOutcome::Closed;
        }
        if n < 0 {
            return match errno() {
                libc::EAGAIN | libc::EINTR => HandleOutcome::Continue,
                err => {
                    tracing::warn!(errno = err, "rpc socket read failed");
                    self.state = ReadState::Closed;
                    HandleOutcome::Closed
                }
            };
        }

        self.buf.extend_from_slice(&chunk[..n as usize]);
        match self.dispatch_frames(ss) {
            // A handler may have requested a close mid-dispatch.
            Ok(()) if self.state == ReadState::Closed => HandleOutcome::Closed,
            Ok(()) => HandleOutcome::Continue,
            Err(e) => {
                tracing::warn!(error = %e, "closing rpc connection");
                self.state = ReadState::Closed;
                HandleOutcome::Closed
            }
        }
    }

    fn handle_close(&mut self, ss: &mut SelectServer) {
        self.state = ReadState::Closed;
        if !self.close_notified {
            self.close_notified = true;
            self.handler.handle_close(ss);
        }
    }
}

impl WriteHandler for RpcConnection {
    fn handle_write(&mut self, ss: &mut SelectServer) -> HandleOutcome {
        match self.out.flush() {
            Ok(true) => {
                // Flushed: stop watching for write readiness.
                ss.remove_write_descriptor(self.out.fd);
                HandleOutcome::Continue
            }
            Ok(false) => HandleOutcome::Continue,
            Err(e) => {
                tracing::warn!(error = %e, "rpc socket write failed");
                self.close(ss);
                HandleOutcome::Closed
            }
        }
    }
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("fd", &self.fd.as_raw_fd())
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .field("pending_output", &self.out.pending_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxd_reactor::ReactorOptions;
    use std::cell::Cell;
    use std::os::fd::FromRawFd;
    use std::time::Duration;

    fn socketpair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(ret, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn server() -> SelectServer {
        SelectServer::new(ReactorOptions {
            poll_interval: Duration::from_millis(20),
        })
        .unwrap()
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = encode_header(PROTOCOL_VERSION, payload.len() as u32)
            .to_be_bytes()
            .to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn send_raw(fd: &OwnedFd, bytes: &[u8]) {
        let ret = unsafe {
            libc::write(
                fd.as_raw_fd(),
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };
        assert_eq!(ret, bytes.len() as isize);
    }

    fn recv_raw(fd: &OwnedFd, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let ret = unsafe {
            libc::read(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if ret <= 0 {
            return Vec::new();
        }
        buf.truncate(ret as usize);
        buf
    }

    #[derive(Default)]
    struct Collected {
        frames: RefCell<Vec<Vec<u8>>>,
        closed: Cell<bool>,
    }

    struct Collector {
        state: Rc<Collected>,
    }

    impl RpcHandler for Collector {
        fn handle_frame(&mut self, payload: &[u8], _tx: &mut FrameSender<'_>, _ss: &mut SelectServer) {
            self.state.frames.borrow_mut().push(payload.to_vec());
        }

        fn handle_close(&mut self, _ss: &mut SelectServer) {
            self.state.closed.set(true);
        }
    }

    fn collector() -> (Box<Collector>, Rc<Collected>) {
        let state = Rc::new(Collected::default());
        (Box::new(Collector { state: state.clone() }), state)
    }

    #[test]
    fn test_frame_reassembly_one_byte_at_a_time() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        assert!(RpcConnection::attach(&conn, &mut ss));

        let wire = frame(b"stereo");
        assert_eq!(wire.len(), 10);
        for (i, byte) in wire.iter().enumerate() {
            send_raw(&peer, std::slice::from_ref(byte));
            ss.run_once().unwrap();
            let expected = if i == wire.len() - 1 { 1 } else { 0 };
            assert_eq!(state.frames.borrow().len(), expected, "after byte {}", i);
        }
        assert_eq!(state.frames.borrow()[0], b"stereo");
    }

    #[test]
    fn test_multi_frame_burst_single_readiness_event() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        let mut wire = frame(b"first!");
        wire.extend_from_slice(&frame(b"second"));
        send_raw(&peer, &wire);

        ss.run_once().unwrap();
        let frames = state.frames.borrow();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"first!");
        assert_eq!(frames[1], b"second");
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        send_raw(&peer, &frame(b""));
        ss.run_once().unwrap();
        assert_eq!(state.frames.borrow().as_slice(), &[Vec::<u8>::new()]);
    }

    #[test]
    fn test_bad_version_closes_without_dispatch() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        let mut wire = encode_header(2, 6).to_be_bytes().to_vec();
        wire.extend_from_slice(b"stereo");
        send_raw(&peer, &wire);

        ss.run_once().unwrap();
        assert!(state.closed.get());
        assert!(state.frames.borrow().is_empty());
        assert!(conn.borrow().is_closed());
        // Registration is gone.
        let fd = conn.borrow().out.fd;
        assert!(!ss.remove_read_descriptor(fd));
    }

    #[test]
    fn test_oversized_declared_length_closes() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        let wire = encode_header(PROTOCOL_VERSION, (MAX_FRAME_PAYLOAD + 1) as u32).to_be_bytes();
        send_raw(&peer, &wire);

        ss.run_once().unwrap();
        assert!(state.closed.get());
        assert!(state.frames.borrow().is_empty());
    }

    #[test]
    fn test_peer_eof_closes_once() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        drop(peer);
        ss.run_once().unwrap();
        assert!(state.closed.get());
        assert!(conn.borrow().is_closed());

        // Send after close is rejected.
        let err = conn.borrow_mut().send_frame(&mut ss, b"nope").unwrap_err();
        assert!(matches!(err, RpcError::Closed));
    }

    #[test]
    fn test_small_send_goes_out_immediately() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, _state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        conn.borrow_mut().send_frame(&mut ss, b"levels").unwrap();
        assert_eq!(conn.borrow().pending_output(), 0);
        assert_eq!(recv_raw(&peer, 64), frame(b"levels"));
    }

    #[test]
    fn test_echo_response_from_handler() {
        struct Echo;
        impl RpcHandler for Echo {
            fn handle_frame(
                &mut self,
                payload: &[u8],
                tx: &mut FrameSender<'_>,
                ss: &mut SelectServer,
            ) {
                tx.send(ss, payload).unwrap();
            }
        }

        let mut ss = server();
        let (local, peer) = socketpair();
        let conn = RpcConnection::new(local, Box::new(Echo)).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        send_raw(&peer, &frame(b"ping01"));
        ss.run_once().unwrap();
        assert_eq!(recv_raw(&peer, 64), frame(b"ping01"));
    }

    #[test]
    fn test_handler_closes_own_connection_mid_dispatch() {
        struct CloseAfterFirst {
            state: Rc<Collected>,
        }
        impl RpcHandler for CloseAfterFirst {
            fn handle_frame(
                &mut self,
                payload: &[u8],
                tx: &mut FrameSender<'_>,
                _ss: &mut SelectServer,
            ) {
                self.state.frames.borrow_mut().push(payload.to_vec());
                tx.close();
            }

            fn handle_close(&mut self, _ss: &mut SelectServer) {
                assert!(!self.state.closed.get(), "close notified twice");
                self.state.closed.set(true);
            }
        }

        let mut ss = server();
        let (local, peer) = socketpair();
        let state = Rc::new(Collected::default());
        let conn =
            RpcConnection::new(local, Box::new(CloseAfterFirst { state: state.clone() })).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        // Two frames in one burst: the close after the first must stop
        // the second from dispatching.
        let mut wire = frame(b"first!");
        wire.extend_from_slice(&frame(b"second"));
        send_raw(&peer, &wire);

        ss.run_once().unwrap();
        assert_eq!(state.frames.borrow().as_slice(), &[b"first!".to_vec()]);
        assert!(state.closed.get());
        assert!(conn.borrow().is_closed());

        // Registration is gone and later sends are rejected.
        let fd = conn.borrow().out.fd;
        assert!(!ss.remove_read_descriptor(fd));
        let err = conn.borrow_mut().send_frame(&mut ss, b"late").unwrap_err();
        assert!(matches!(err, RpcError::Closed));
    }

    #[test]
    fn test_backpressure_flushes_via_write_readiness() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, _state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        // Far more than the socketpair buffers will take in one write.
        let payload = vec![0x42u8; 4 * 1024 * 1024];
        conn.borrow_mut().send_frame(&mut ss, &payload).unwrap();
        assert!(conn.borrow().pending_output() > 0, "write was not partial");

        let expected = payload.len() + 4;
        let mut received = Vec::with_capacity(expected);
        let mut spins = 0;
        while received.len() < expected {
            let chunk = recv_raw(&peer, 65536);
            received.extend_from_slice(&chunk);
            ss.run_once().unwrap();
            spins += 1;
            assert!(spins < 100_000, "flush made no progress");
        }
        assert_eq!(received.len(), expected);
        assert_eq!(
            &received[..4],
            &encode_header(PROTOCOL_VERSION, payload.len() as u32).to_be_bytes()
        );
        assert!(received[4..].iter().all(|&b| b == 0x42));
        assert_eq!(conn.borrow().pending_output(), 0);

        // Write interest was dropped after the flush.
        let fd = conn.borrow().out.fd;
        assert!(!ss.remove_write_descriptor(fd));
    }

    #[test]
    fn test_send_order_preserved_under_backpressure() {
        let mut ss = server();
        let (local, peer) = socketpair();
        let (handler, _state) = collector();
        let conn = RpcConnection::new(local, handler).unwrap();
        RpcConnection::attach(&conn, &mut ss);

        let big = vec![1u8; 2 * 1024 * 1024];
        conn.borrow_mut().send_frame(&mut ss, &big).unwrap();
        conn.borrow_mut().send_frame(&mut ss, b"tail03").unwrap();

        let expected = (4 + big.len()) + (4 + 6);
        let mut received = Vec::with_capacity(expected);
        let mut spins = 0;
        while received.len() < expected {
            received.extend_from_slice(&recv_raw(&peer, 65536));
            ss.run_once().unwrap();
            spins += 1;
            assert!(spins < 100_000, "flush made no progress");
        }
        // The small frame comes after every byte of the big one.
        assert_eq!(&received[expected - 10..], frame(b"tail03").as_slice());
    }
}
