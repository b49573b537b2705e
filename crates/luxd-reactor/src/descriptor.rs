//! Descriptor callback traits.
//!
//! A handler wraps one OS descriptor (socket, pipe end). The reactor holds
//! an `Rc<RefCell<dyn ...>>` clone per registration and drops it when the
//! descriptor closes or is deregistered, so handler lifetime follows the
//! caller's remaining clones: keep one to retain the object past the
//! close, register the only clone to have the close free it.
//!
//! **Contract:**
//! - Callbacks run on the reactor thread and must never block.
//! - Callbacks receive `&mut SelectServer` and may freely (de)register
//!   descriptors and timers; mutations take effect no earlier than the
//!   next loop iteration.
//! - A handler may remove its own registration from inside its callback
//!   (self-removal during dispatch is safe).

use crate::select_server::SelectServer;

/// What the reactor should do with the registration after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Keep the registration.
    Continue,
    /// The endpoint is gone: deregister and (for read handlers) deliver
    /// `handle_close`.
    Closed,
}

/// Read-readiness callback for one descriptor.
pub trait ReadHandler {
    /// The descriptor is readable; consume what the OS has without
    /// blocking.
    fn handle_read(&mut self, ss: &mut SelectServer) -> HandleOutcome;

    /// Called once after the reactor deregisters this handler because
    /// `handle_read` returned [`HandleOutcome::Closed`].
    fn handle_close(&mut self, _ss: &mut SelectServer) {}
}

/// Write-readiness callback for one descriptor. Used by buffered writers
/// under backpressure; register only while there is queued output, and
/// deregister from inside `handle_write` once flushed.
pub trait WriteHandler {
    fn handle_write(&mut self, ss: &mut SelectServer) -> HandleOutcome;
}
