//! Cross-thread work injection.
//!
//! The one sanctioned way for foreign threads to touch the reactor: push
//! a closure onto a lock-free FIFO, then write a byte to a non-blocking
//! self-pipe whose read end is an ordinary registered descriptor. A
//! reactor blocked in poll(2) wakes, its loopback read handler drains the
//! pipe and runs the queued closures on the reactor thread.
//!
//! The queue only hands closures over; it is never held across a
//! callback, so a closure may itself call [`Remote::execute`] without
//! deadlock (the new closure runs on the next wake).

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::error::{errno, ReactorError, Result};
use crate::select_server::SelectServer;

/// Deferred unit of work, invoked once on the reactor thread.
pub(crate) type Task = Box<dyn FnOnce(&mut SelectServer) + Send>;

/// Self-pipe whose read end becomes readable whenever any thread calls
/// [`WakePipe::wake`]. Both ends are non-blocking; both close on drop.
pub(crate) struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub(crate) fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if ret != 0 {
            return Err(ReactorError::Pipe(errno()));
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Make the read end ready. Never blocks; a full pipe already means a
    /// wake is pending, so EAGAIN is success.
    pub(crate) fn wake(&self) {
        let byte = [1u8];
        let ret = unsafe { libc::write(self.write_fd, byte.as_ptr() as *const libc::c_void, 1) };
        if ret < 0 {
            let err = errno();
            if err != libc::EAGAIN && err != libc::EINTR {
                tracing::warn!(errno = err, "wake pipe write failed");
            }
        }
    }

    /// Swallow every pending wake byte. Called from the loopback read
    /// handler on the reactor thread.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let ret =
                unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if ret <= 0 {
                break; // EAGAIN, EOF, or EINTR — all fine here
            }
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Cloneable handle for submitting work to the reactor from any thread.
///
/// Closures are queued in submission order and run on the reactor thread
/// during the read-descriptor pass of a loop iteration. Submitting while
/// the reactor is blocked wakes it immediately; no pre-existing timer is
/// needed.
#[derive(Clone)]
pub struct Remote {
    tasks: Arc<SegQueue<Task>>,
    pipe: Arc<WakePipe>,
}

impl Remote {
    pub(crate) fn new(pipe: Arc<WakePipe>) -> Self {
        Self {
            tasks: Arc::new(SegQueue::new()),
            pipe,
        }
    }

    /// Queue `f` to run on the reactor thread.
    ///
    /// Safe to call from any thread, including from reactor callbacks and
    /// after termination (a closure submitted after `terminate()` runs
    /// only if `run_once()` is invoked again; otherwise it is dropped
    /// with the `SelectServer`).
    pub fn execute(&self, f: impl FnOnce(&mut SelectServer) + Send + 'static) {
        self.tasks.push(Box::new(f));
        self.pipe.wake();
    }

    pub(crate) fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn pop(&self) -> Option<Task> {
        self.tasks.pop()
    }

    pub(crate) fn wake_pipe(&self) -> &Arc<WakePipe> {
        &self.pipe
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("pending", &self.tasks.len())
            .field("wake_fd", &self.pipe.read_fd)
            .finish()
    }
}
