//! Reactor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReactorError {
    /// poll(2) failed with something other than EINTR.
    #[error("poll failed: errno {0}")]
    Poll(i32),
    /// Creating the loopback wake pipe failed.
    #[error("wake pipe setup failed: errno {0}")]
    Pipe(i32),
}

pub type Result<T> = std::result::Result<T, ReactorError>;

/// Current thread's errno. Callers grab this immediately after a failed
/// libc call.
#[inline]
pub(crate) fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}
