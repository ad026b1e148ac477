//! Completion notification through an eventfd.
//!
//! A [`Notifier`] is attached to requests before submission. Each time one of
//! those requests completes, the engine adds one to the eventfd counter, so an
//! external event loop (epoll, mio, ...) can watch the descriptor instead of
//! polling the context.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;

/// An eventfd signalled on request completion.
///
/// The notifier does no locking of its own. Share it with `Arc`; requests hold
/// a clone so the descriptor stays open while they are in flight.
#[derive(Debug)]
pub struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    /// Create a non-blocking, close-on-exec eventfd.
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Safety: eventfd returned a fresh descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Notifier { fd })
    }

    /// Read and reset the counter. Returns 0 when nothing is pending.
    pub fn drain(&self) -> Result<u64> {
        let mut value: u64 = 0;
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(e.into());
        }
        Ok(value)
    }

    /// Add `n` to the counter, as the kernel does for each completion.
    pub fn signal(&self, n: u64) -> Result<()> {
        signal_fd(self.fd.as_raw_fd(), n)
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Write `n` to an eventfd by raw descriptor.
pub(crate) fn signal_fd(fd: RawFd, n: u64) -> Result<()> {
    let ret = unsafe { libc::write(fd, &n as *const u64 as *const libc::c_void, 8) };
    if ret < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// Attach `notifier` to every request in `requests`.
///
/// Must be applied before submission; requests already moved into a context
/// are out of reach by construction.
pub fn attach_notifier(requests: &mut [Request], notifier: &Arc<Notifier>) {
    for request in requests.iter_mut() {
        request.set_notifier(Some(Arc::clone(notifier)));
    }
}
