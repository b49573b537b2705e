//! poll(2) wrapper tracking read/write descriptor interest.
//!
//! The poller owns only the fd sets, not the handlers — the
//! `SelectServer` maps fds back to callbacks. Sets keep registration
//! order so the ready lists (and therefore dispatch) are deterministic.
//!
//! Error handling: EINTR is a spurious wake — report "nothing ready" and
//! let the caller re-evaluate timers. Anything else surfaces as
//! [`ReactorError::Poll`]; the run loop logs it and skips the wait for
//! one iteration rather than dying.

use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{errno, ReactorError, Result};

/// Descriptors reported ready by one [`Poller::wait`] call, in
/// registration order.
#[derive(Debug, Default)]
pub struct ReadyFds {
    pub readable: Vec<RawFd>,
    pub writable: Vec<RawFd>,
}

/// Read/write interest sets over poll(2).
pub struct Poller {
    read_fds: Vec<RawFd>,
    write_fds: Vec<RawFd>,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            read_fds: Vec::new(),
            write_fds: Vec::new(),
        }
    }

    /// Track `fd` for read readiness. False if already tracked.
    pub fn add_read(&mut self, fd: RawFd) -> bool {
        if self.read_fds.contains(&fd) {
            return false;
        }
        self.read_fds.push(fd);
        true
    }

    pub fn remove_read(&mut self, fd: RawFd) -> bool {
        match self.read_fds.iter().position(|&f| f == fd) {
            Some(pos) => {
                self.read_fds.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Track `fd` for write readiness. False if already tracked.
    pub fn add_write(&mut self, fd: RawFd) -> bool {
        if self.write_fds.contains(&fd) {
            return false;
        }
        self.write_fds.push(fd);
        true
    }

    pub fn remove_write(&mut self, fd: RawFd) -> bool {
        match self.write_fds.iter().position(|&f| f == fd) {
            Some(pos) => {
                self.write_fds.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Block until a tracked descriptor is ready or `timeout` elapses.
    ///
    /// Tolerates an empty interest set (pure timer wait) and a zero
    /// timeout (immediate poll).
    pub fn wait(&mut self, timeout: Duration) -> Result<ReadyFds> {
        let mut pfds: Vec<libc::pollfd> = Vec::with_capacity(self.read_fds.len() + self.write_fds.len());
        for &fd in &self.read_fds {
            pfds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for &fd in &self.write_fds {
            match pfds.iter_mut().find(|p| p.fd == fd) {
                Some(p) => p.events |= libc::POLLOUT,
                None => pfds.push(libc::pollfd {
                    fd,
                    events: libc::POLLOUT,
                    revents: 0,
                }),
            }
        }

        // Round up so a sub-millisecond deadline does not degrade into a
        // zero-timeout busy loop.
        let mut millis = timeout.as_millis().min(i32::MAX as u128 - 1) as i32;
        if Duration::from_millis(millis as u64) < timeout {
            millis += 1;
        }
        let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, millis) };
        if ret < 0 {
            let err = errno();
            if err == libc::EINTR {
                // Spurious wake: nothing ready, timers get re-evaluated.
                return Ok(ReadyFds::default());
            }
            return Err(ReactorError::Poll(err));
        }

        let mut ready = ReadyFds::default();
        if ret == 0 {
            return Ok(ready);
        }
        // POLLERR/POLLHUP surface through the read callback so the owner
        // observes EOF/reset and closes; POLLNVAL means a stale
        // registration and is reported the same way.
        for &fd in &self.read_fds {
            if let Some(p) = pfds.iter().find(|p| p.fd == fd) {
                if p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    ready.readable.push(fd);
                }
            }
        }
        for &fd in &self.write_fds {
            if let Some(p) = pfds.iter().find(|p| p.fd == fd) {
                if p.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    ready.writable.push(fd);
                }
            }
        }
        Ok(ready)
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("read_fds", &self.read_fds)
            .field("write_fds", &self.write_fds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn make_pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_no_fds_pure_timer_wait() {
        let mut poller = Poller::new();
        let start = Instant::now();
        let ready = poller.wait(Duration::from_millis(30)).unwrap();
        assert!(ready.readable.is_empty() && ready.writable.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_zero_timeout_immediate() {
        let (r, w) = make_pipe();
        let mut poller = Poller::new();
        poller.add_read(r);
        let start = Instant::now();
        let ready = poller.wait(Duration::ZERO).unwrap();
        assert!(ready.readable.is_empty());
        assert!(start.elapsed() < Duration::from_millis(50));
        close(r);
        close(w);
    }

    #[test]
    fn test_readable_pipe() {
        let (r, w) = make_pipe();
        let mut poller = Poller::new();
        assert!(poller.add_read(r));
        assert!(!poller.add_read(r)); // duplicate

        let byte = [1u8];
        unsafe { libc::write(w, byte.as_ptr() as *const libc::c_void, 1) };

        let ready = poller.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(ready.readable, vec![r]);
        close(r);
        close(w);
    }

    #[test]
    fn test_writable_pipe() {
        let (r, w) = make_pipe();
        let mut poller = Poller::new();
        poller.add_write(w);
        let ready = poller.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(ready.writable, vec![w]);
        close(r);
        close(w);
    }

    #[test]
    fn test_ready_in_registration_order() {
        let (r1, w1) = make_pipe();
        let (r2, w2) = make_pipe();
        let mut poller = Poller::new();
        poller.add_read(r2);
        poller.add_read(r1);

        let byte = [1u8];
        unsafe {
            libc::write(w1, byte.as_ptr() as *const libc::c_void, 1);
            libc::write(w2, byte.as_ptr() as *const libc::c_void, 1);
        }
        let ready = poller.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(ready.readable, vec![r2, r1]);
        for fd in [r1, w1, r2, w2] {
            close(fd);
        }
    }

    #[test]
    fn test_remove() {
        let (r, w) = make_pipe();
        let mut poller = Poller::new();
        poller.add_read(r);
        assert!(poller.remove_read(r));
        assert!(!poller.remove_read(r));

        let byte = [1u8];
        unsafe { libc::write(w, byte.as_ptr() as *const libc::c_void, 1) };
        let ready = poller.wait(Duration::ZERO).unwrap();
        assert!(ready.readable.is_empty());
        close(r);
        close(w);
    }
}
