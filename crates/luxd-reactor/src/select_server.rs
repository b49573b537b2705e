//! The reactor run loop.
//!
//! One iteration:
//!
//! 1. `wait = min(poll_interval, time until earliest live timer)`
//! 2. block in the poller for at most `wait`
//! 3. invoke ready read callbacks, in registration order (the loopback
//!    descriptor is an ordinary first-registered read descriptor, so
//!    cross-thread closures run inside this pass)
//! 4. invoke ready write callbacks
//! 5. service expired timers, in fire-time order
//! 6. check the termination flag and go again
//!
//! This order is a contract: a closure enqueued while servicing a
//! descriptor runs on the loopback wake in the same or next iteration,
//! never before the descriptor pass that enqueued it.
//!
//! Registration methods are safe to call from inside callbacks; the ready
//! set for the current iteration was snapshotted before dispatch, so
//! mutations take effect on the next iteration.

use std::cell::RefCell;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::descriptor::{HandleOutcome, ReadHandler, WriteHandler};
use crate::error::Result;
use crate::poller::Poller;
use crate::remote::{Remote, WakePipe};
use crate::timer::{TimerId, TimerManager};

/// Tunables for a [`SelectServer`].
#[derive(Debug, Clone)]
pub struct ReactorOptions {
    /// Upper bound on one poll wait when no timer is due sooner.
    pub poll_interval: Duration,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

struct ReadReg {
    fd: RawFd,
    handler: Rc<RefCell<dyn ReadHandler>>,
}

struct WriteReg {
    fd: RawFd,
    handler: Rc<RefCell<dyn WriteHandler>>,
}

/// Cross-thread termination handle. Sets the flag and wakes the poll so
/// the loop observes it promptly; the in-flight iteration still completes.
#[derive(Clone)]
pub struct Terminator {
    flag: Arc<AtomicBool>,
    pipe: Arc<WakePipe>,
}

impl Terminator {
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::Release);
        self.pipe.wake();
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("terminated", &self.flag.load(Ordering::Relaxed))
            .finish()
    }
}

/// Internal read handler for the wake pipe: drain the bytes, then run the
/// closures that were queued when they were written.
struct LoopbackHandler {
    remote: Remote,
}

impl ReadHandler for LoopbackHandler {
    fn handle_read(&mut self, ss: &mut SelectServer) -> HandleOutcome {
        self.remote.wake_pipe().drain();
        // Snapshot the count: a closure may queue more work, which then
        // belongs to the next wake, not this drain.
        let pending = self.remote.pending();
        for _ in 0..pending {
            match self.remote.pop() {
                Some(task) => task(ss),
                None => break,
            }
        }
        HandleOutcome::Continue
    }
}

/// Single-threaded reactor multiplexing descriptor readiness, timers, and
/// cross-thread closures.
pub struct SelectServer {
    options: ReactorOptions,
    poller: Poller,
    timers: TimerManager,
    read_handlers: Vec<ReadReg>,
    write_handlers: Vec<WriteReg>,
    remote: Remote,
    loopback_fd: RawFd,
    terminated: Arc<AtomicBool>,
}

impl SelectServer {
    pub fn new(options: ReactorOptions) -> Result<Self> {
        let pipe = Arc::new(WakePipe::new()?);
        let loopback_fd = pipe.read_fd();
        let remote = Remote::new(pipe);

        let mut ss = Self {
            options,
            poller: Poller::new(),
            timers: TimerManager::new(),
            read_handlers: Vec::new(),
            write_handlers: Vec::new(),
            remote: remote.clone(),
            loopback_fd,
            terminated: Arc::new(AtomicBool::new(false)),
        };
        // First registration, so queued closures run at the head of every
        // read pass.
        ss.add_read_descriptor(loopback_fd, Rc::new(RefCell::new(LoopbackHandler { remote })));
        Ok(ss)
    }

    // ── Descriptor registration ──────────────────────────────────────

    /// Register `handler` for read readiness on `fd`. Returns false if
    /// `fd` already has a read registration.
    ///
    /// The reactor holds one clone of `handler` for the lifetime of the
    /// registration and drops it when the descriptor closes or is
    /// removed. Keep a clone to retain the handler past that point;
    /// register the only clone to have the close free it.
    pub fn add_read_descriptor(
        &mut self,
        fd: RawFd,
        handler: Rc<RefCell<dyn ReadHandler>>,
    ) -> bool {
        if self.read_handlers.iter().any(|r| r.fd == fd) {
            return false;
        }
        self.poller.add_read(fd);
        self.read_handlers.push(ReadReg { fd, handler });
        true
    }

    /// Drop the read registration for `fd`. Returns false if `fd` was not
    /// registered (the loopback descriptor cannot be removed).
    pub fn remove_read_descriptor(&mut self, fd: RawFd) -> bool {
        if fd == self.loopback_fd {
            return false;
        }
        match self.read_handlers.iter().position(|r| r.fd == fd) {
            Some(pos) => {
                self.read_handlers.remove(pos);
                self.poller.remove_read(fd);
                true
            }
            None => false,
        }
    }

    /// Register `handler` for write readiness on `fd` (backpressured
    /// writers). Returns false if `fd` already has a write registration.
    pub fn add_write_descriptor(
        &mut self,
        fd: RawFd,
        handler: Rc<RefCell<dyn WriteHandler>>,
    ) -> bool {
        if self.write_handlers.iter().any(|r| r.fd == fd) {
            return false;
        }
        self.poller.add_write(fd);
        self.write_handlers.push(WriteReg { fd, handler });
        true
    }

    pub fn remove_write_descriptor(&mut self, fd: RawFd) -> bool {
        match self.write_handlers.iter().position(|r| r.fd == fd) {
            Some(pos) => {
                self.write_handlers.remove(pos);
                self.poller.remove_write(fd);
                true
            }
            None => false,
        }
    }

    // ── Timers ───────────────────────────────────────────────────────

    pub fn register_single_timeout(
        &mut self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> TimerId {
        self.timers.register_single_timeout(delay, callback)
    }

    pub fn register_repeating_timeout(
        &mut self,
        interval: Duration,
        callback: impl FnMut() -> bool + 'static,
    ) -> TimerId {
        self.timers.register_repeating_timeout(interval, callback)
    }

    pub fn remove_timeout(&mut self, id: TimerId) -> bool {
        self.timers.remove_timeout(id)
    }

    // ── Cross-thread work ────────────────────────────────────────────

    /// Handle for submitting closures from other threads.
    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }

    /// Queue `f` to run on the reactor thread. See [`Remote::execute`].
    pub fn execute(&self, f: impl FnOnce(&mut SelectServer) + Send + 'static) {
        self.remote.execute(f);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Handle for stopping the loop from any thread.
    pub fn terminator(&self) -> Terminator {
        Terminator {
            flag: self.terminated.clone(),
            pipe: self.remote.wake_pipe().clone(),
        }
    }

    /// Stop the loop. Takes effect at the next loop check; the current
    /// iteration's dispatch completes first.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Run until [`terminate`](Self::terminate). Poll failures are logged
    /// and that iteration's wait is skipped; they never abort the loop.
    pub fn run(&mut self) {
        while !self.is_terminated() {
            if let Err(e) = self.run_once() {
                tracing::warn!(error = %e, "event loop iteration failed");
            }
        }
    }

    /// Exactly one loop iteration, for embedding in a foreign event loop.
    /// Runs regardless of the termination flag.
    pub fn run_once(&mut self) -> Result<()> {
        let now = Instant::now();
        let wait = self.timers.next_wake(now, self.options.poll_interval);
        let ready = self.poller.wait(wait)?;

        for fd in ready.readable {
            // Skip anything deregistered earlier in this pass.
            let found = self
                .read_handlers
                .iter()
                .find(|r| r.fd == fd)
                .map(|r| r.handler.clone());
            let Some(handler) = found else { continue };
            let outcome = handler.borrow_mut().handle_read(self);
            if outcome == HandleOutcome::Closed {
                self.remove_read_descriptor(fd);
                self.remove_write_descriptor(fd);
                handler.borrow_mut().handle_close(self);
            }
        }

        for fd in ready.writable {
            let found = self
                .write_handlers
                .iter()
                .find(|r| r.fd == fd)
                .map(|r| r.handler.clone());
            let Some(handler) = found else { continue };
            if handler.borrow_mut().handle_write(self) == HandleOutcome::Closed {
                self.remove_write_descriptor(fd);
            }
        }

        self.timers.service_expired(Instant::now());
        Ok(())
    }
}

impl fmt::Debug for SelectServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectServer")
            .field("read_descriptors", &self.read_handlers.len())
            .field("write_descriptors", &self.write_handlers.len())
            .field("timers", &self.timers)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
