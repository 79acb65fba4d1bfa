//! Cancellation token for the relay loop.
//!
//! The token is an eventfd that becomes readable once shutdown is requested
//! and stays readable afterwards, so a `poll` that includes it wakes up no
//! matter when the request arrives relative to the wait.

use nix::sys::eventfd::{EfdFlags, EventFd};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

struct Inner {
    event_fd: EventFd,
    requested: AtomicBool,
}

/// Shared shutdown request. Clones observe the same request.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        let event_fd =
            EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
                .map_err(io::Error::from)?;
        Ok(Self {
            inner: Arc::new(Inner {
                event_fd,
                requested: AtomicBool::new(false),
            }),
        })
    }

    /// Request shutdown. Only the first call writes the eventfd.
    pub fn trigger(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        // The counter is never drained, so a failed write can only mean
        // the counter is already non-zero.
        if let Err(e) = self.inner.event_fd.write(1) {
            debug!(error = %e, "shutdown eventfd write failed");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }
}

impl AsFd for Shutdown {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.event_fd.as_fd()
    }
}
