//! Linux native AIO through raw syscalls.

use std::time::Duration;

use crate::abi::{Iocb, IoEvent};
use crate::engine::{Backend, Engine, RawResult};
use crate::error::Errno;
use crate::timeout;

/// Wrapper around a kernel `aio_context_t`.
pub(crate) struct NativeAio {
    ctx: libc::c_ulong,
    destroyed: bool,
}

impl NativeAio {
    /// `io_setup` sized for `max_events` concurrent requests.
    pub fn setup(max_events: u32) -> RawResult<Self> {
        let mut ctx: libc::c_ulong = 0;
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_setup,
                max_events as libc::c_long,
                &mut ctx as *mut libc::c_ulong,
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        tracing::debug!(ctx, max_events, "io_setup");
        Ok(NativeAio {
            ctx,
            destroyed: false,
        })
    }
}

impl Backend for NativeAio {
    fn engine(&self) -> Engine {
        Engine::Native
    }

    unsafe fn submit(&self, iocbs: &mut [*mut Iocb]) -> RawResult<usize> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_submit,
                self.ctx,
                iocbs.len() as libc::c_long,
                iocbs.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(ret as usize)
    }

    fn get_events(
        &self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
        out: &mut Vec<IoEvent>,
    ) -> RawResult<()> {
        out.clear();
        out.reserve(max);
        let ts = timeout.map(timeout::timespec_from_duration);
        let ts_ptr = match ts {
            Some(ref ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                self.ctx,
                min as libc::c_long,
                max as libc::c_long,
                out.as_mut_ptr(),
                ts_ptr,
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        // Safety: the kernel initialised `ret <= max` entries.
        unsafe { out.set_len(ret as usize) };
        Ok(())
    }

    unsafe fn cancel(&self, iocb: *mut Iocb) -> RawResult<IoEvent> {
        let mut event = IoEvent::default();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_cancel,
                self.ctx,
                iocb,
                &mut event as *mut IoEvent,
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(event)
    }

    fn destroy(&mut self) -> RawResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        // Blocks until every outstanding request has completed or been
        // cancelled, after which no buffer is referenced by the kernel.
        let ret = unsafe { libc::syscall(libc::SYS_io_destroy, self.ctx) };
        if ret < 0 {
            return Err(Errno::last());
        }
        tracing::debug!(ctx = self.ctx, "io_destroy");
        Ok(())
    }
}

impl Drop for NativeAio {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(ctx = self.ctx, errno = e.0, "io_destroy failed");
        }
    }
}
