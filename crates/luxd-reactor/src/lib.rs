//! # luxd-reactor
//!
//! The single-threaded event loop at the heart of the luxd daemon.
//!
//! A [`SelectServer`] multiplexes descriptor readiness, timers, and work
//! handed over from other threads, dispatching everything on the one
//! thread that calls [`SelectServer::run`]:
//!
//! ```text
//!            ┌───────────────────────────────┐
//!            │          SelectServer         │
//!            │                               │
//!   fds ───► │  Poller ──► ready callbacks   │
//!   timers ─►│  TimerManager ──► expired cbs │
//!   threads ►│  Remote (self-pipe + queue)   │
//!            └───────────────────────────────┘
//! ```
//!
//! Dispatch order within one iteration is fixed and is a contract callers
//! may rely on: ready read descriptors (in registration order), then ready
//! write descriptors, then expired timers. Closures submitted through
//! [`Remote::execute`] ride the loopback descriptor and therefore run
//! during the read pass.
//!
//! Callbacks must never block — a blocked callback stalls every
//! descriptor and timer in the process.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod descriptor;
        pub mod error;
        pub mod poller;
        pub mod remote;
        pub mod select_server;
        pub mod timer;
    } else {
        compile_error!("luxd-reactor requires a unix poll(2) platform");
    }
}

pub use descriptor::{HandleOutcome, ReadHandler, WriteHandler};
pub use error::{ReactorError, Result};
pub use remote::Remote;
pub use select_server::{ReactorOptions, SelectServer, Terminator};
pub use timer::{TimerId, TimerManager};
