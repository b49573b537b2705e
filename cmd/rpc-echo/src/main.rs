//! RPC echo demo
//!
//! Wires a "daemon" connection and a "client" connection (the two ends of
//! a socketpair) onto one `SelectServer`. The client sends an RLE-encoded
//! DMX universe, the daemon echoes every frame back, and the client
//! terminates the loop once the echo arrives.
//!
//! Run with `RUST_LOG=debug cargo run -p luxd-rpc-echo` for the wire
//! chatter.

use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::Duration;

use luxd_codec::{decode, encode, DmxBuffer, DMX_UNIVERSE_SIZE};
use luxd_reactor::{ReactorOptions, SelectServer, Terminator};
use luxd_rpc::{FrameSender, RpcConnection, RpcHandler};

fn socketpair() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(ret, 0, "socketpair failed");
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// Daemon side: echo every frame back to the sender.
struct Echo;

impl RpcHandler for Echo {
    fn handle_frame(&mut self, payload: &[u8], tx: &mut FrameSender<'_>, ss: &mut SelectServer) {
        tracing::debug!(bytes = payload.len(), "daemon echoing frame");
        if let Err(e) = tx.send(ss, payload) {
            tracing::warn!(error = %e, "echo send failed");
        }
    }
}

/// Client side: decode the echoed universe and stop the loop.
struct Client {
    stop: Terminator,
}

impl RpcHandler for Client {
    fn handle_frame(&mut self, payload: &[u8], _tx: &mut FrameSender<'_>, _ss: &mut SelectServer) {
        let mut universe = DmxBuffer::new();
        match decode(0, payload, &mut universe) {
            Ok(end) => println!(
                "client got echo: {} encoded bytes -> {} slots, slot 0 = {}",
                payload.len(),
                end,
                universe.as_slice()[0]
            ),
            Err(e) => eprintln!("client got undecodable echo: {}", e),
        }
        self.stop.terminate();
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut ss = SelectServer::new(ReactorOptions {
        poll_interval: Duration::from_millis(100),
    })
    .expect("reactor setup failed");

    let (daemon_fd, client_fd) = socketpair();

    let daemon = RpcConnection::new(daemon_fd, Box::new(Echo)).expect("daemon connection");
    RpcConnection::attach(&daemon, &mut ss);

    let client = RpcConnection::new(
        client_fd,
        Box::new(Client {
            stop: ss.terminator(),
        }),
    )
    .expect("client connection");
    RpcConnection::attach(&client, &mut ss);

    // A simple show frame: banks of level 0x80 with one moving fixture.
    let mut universe = [0u8; DMX_UNIVERSE_SIZE];
    universe[..256].fill(0x80);
    universe[300] = 0xFF;

    let mut encoded = [0u8; DMX_UNIVERSE_SIZE * 2];
    let out = encode(&universe, &mut encoded);
    assert!(out.complete);
    println!("client sending universe: {} slots as {} bytes", DMX_UNIVERSE_SIZE, out.written);

    client
        .borrow_mut()
        .send_frame(&mut ss, &encoded[..out.written])
        .expect("send failed");

    ss.run();
    println!("done");
}
