//! Userspace AIO engine.
//!
//! Runs the same control blocks the kernel would on a small pool of worker
//! threads, with kernel-compatible results: `io_submit` semantics for
//! acceptance (prefix accepted, error only when the first block fails),
//! negative errno in `res`, eventfd signalling through `aio_resfd`, and
//! `-ECANCELED` for blocks cancelled before a worker picked them up.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::abi::{self, Iocb, IoEvent};
use crate::engine::{Backend, Engine, RawResult};
use crate::error::Errno;
use crate::notifier;

/// Default worker count when the caller passes 0.
pub(crate) const DEFAULT_WORKERS: usize = 4;

#[derive(Clone, Copy)]
struct Op {
    /// Control block address, the key for cancellation.
    obj: u64,
    iocb: Iocb,
}

#[derive(Default)]
struct State {
    queued: VecDeque<Op>,
    running: Vec<u64>,
    completed: VecDeque<IoEvent>,
    shutdown: bool,
}

impl State {
    fn outstanding(&self) -> usize {
        self.queued.len() + self.running.len() + self.completed.len()
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when work is queued or on shutdown.
    work: Condvar,
    /// Signalled when an event is completed.
    done: Condvar,
    capacity: usize,
}

pub(crate) struct EmulatedAio {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl EmulatedAio {
    /// Start `workers` threads (0 = default) serving up to `max_events`
    /// outstanding blocks.
    pub fn start(max_events: u32, workers: usize) -> RawResult<Self> {
        if max_events == 0 {
            return Err(Errno(libc::EINVAL));
        }
        let workers = if workers == 0 { DEFAULT_WORKERS } else { workers };

        let mut aio = EmulatedAio {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                work: Condvar::new(),
                done: Condvar::new(),
                capacity: max_events as usize,
            }),
            workers: Vec::with_capacity(workers),
        };

        for id in 0..workers {
            let shared = aio.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("kaio-emu-{id}"))
                .spawn(move || worker(shared))
                .map_err(|e| Errno(e.raw_os_error().unwrap_or(libc::EAGAIN)))?;
            aio.workers.push(handle);
        }

        tracing::debug!(max_events, workers, "emulated aio started");
        Ok(aio)
    }
}

impl Backend for EmulatedAio {
    fn engine(&self) -> Engine {
        Engine::Emulated
    }

    unsafe fn submit(&self, iocbs: &mut [*mut Iocb]) -> RawResult<usize> {
        let mut state = self.shared.state.lock();
        let room = self.shared.capacity.saturating_sub(state.outstanding());

        let mut accepted = 0;
        for &ptr in iocbs.iter() {
            let failure = if accepted == room {
                Some(Errno(libc::EAGAIN))
            } else {
                // Safety: the caller guarantees `ptr` is a live control block.
                let iocb = unsafe { *ptr };
                match validate(&iocb) {
                    Ok(()) => {
                        state.queued.push_back(Op {
                            obj: ptr as u64,
                            iocb,
                        });
                        accepted += 1;
                        None
                    }
                    Err(e) => Some(e),
                }
            };
            if let Some(e) = failure {
                if accepted == 0 {
                    return Err(e);
                }
                break;
            }
        }
        drop(state);

        for _ in 0..accepted {
            self.shared.work.notify_one();
        }
        Ok(accepted)
    }

    fn get_events(
        &self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
        out: &mut Vec<IoEvent>,
    ) -> RawResult<()> {
        out.clear();
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let forever = timeout.is_none() || deadline.is_none();
        let target = min.min(max);

        let mut state = self.shared.state.lock();
        while state.completed.len() < target {
            if forever {
                self.shared.done.wait(&mut state);
            } else if let Some(deadline) = deadline
                && self.shared.done.wait_until(&mut state, deadline).timed_out()
            {
                break;
            }
        }
        let n = state.completed.len().min(max);
        out.extend(state.completed.drain(..n));
        Ok(())
    }

    unsafe fn cancel(&self, iocb: *mut Iocb) -> RawResult<IoEvent> {
        let obj = iocb as u64;
        let mut state = self.shared.state.lock();
        if let Some(pos) = state.queued.iter().position(|op| op.obj == obj)
            && let Some(op) = state.queued.remove(pos)
        {
            return Ok(IoEvent {
                data: op.iocb.aio_data,
                obj,
                res: -(libc::ECANCELED as i64),
                res2: 0,
            });
        }
        let started = state.running.contains(&obj) || state.completed.iter().any(|e| e.obj == obj);
        if started {
            Err(Errno(libc::EAGAIN))
        } else {
            Err(Errno(libc::EINVAL))
        }
    }

    fn destroy(&mut self) -> RawResult<()> {
        if self.workers.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let abandoned = state.queued.len();
            if abandoned > 0 {
                tracing::debug!(abandoned, "dropping queued blocks on shutdown");
            }
            state.queued.clear();
        }
        self.shared.work.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("emulated aio worker panicked");
            }
        }
        Ok(())
    }
}

impl Drop for EmulatedAio {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

fn worker(shared: Arc<Shared>) {
    loop {
        let op = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(op) = state.queued.pop_front() {
                    state.running.push(op.obj);
                    break op;
                }
                shared.work.wait(&mut state);
            }
        };

        let res = execute(&op.iocb);

        {
            let mut state = shared.state.lock();
            state.running.retain(|&obj| obj != op.obj);
            state.completed.push_back(IoEvent {
                data: op.iocb.aio_data,
                obj: op.obj,
                res,
                res2: 0,
            });
            // Under the lock, so the request holding the notifier open cannot
            // be reaped before the write lands.
            if op.iocb.aio_flags & abi::IOCB_FLAG_RESFD != 0
                && let Err(e) = notifier::signal_fd(op.iocb.aio_resfd as RawFd, 1)
            {
                tracing::warn!(error = %e, resfd = op.iocb.aio_resfd, "failed to signal notifier");
            }
        }
        shared.done.notify_all();
    }
}

/// Checks the kernel performs before accepting a block.
fn validate(iocb: &Iocb) -> RawResult<()> {
    if iocb.aio_reserved2 != 0 {
        return Err(Errno(libc::EINVAL));
    }
    match iocb.aio_lio_opcode {
        abi::IOCB_CMD_PREAD | abi::IOCB_CMD_PWRITE => {}
        // Sync blocks carry no buffer, offset or per-call flags.
        abi::IOCB_CMD_FSYNC | abi::IOCB_CMD_FDSYNC => {
            if iocb.aio_buf != 0
                || iocb.aio_offset != 0
                || iocb.aio_nbytes != 0
                || iocb.aio_rw_flags != 0
            {
                return Err(Errno(libc::EINVAL));
            }
        }
        _ => return Err(Errno(libc::EINVAL)),
    }
    if !fd_is_open(iocb.aio_fildes as RawFd) {
        return Err(Errno(libc::EBADF));
    }
    if iocb.aio_flags & abi::IOCB_FLAG_RESFD != 0 && !fd_is_open(iocb.aio_resfd as RawFd) {
        return Err(Errno(libc::EBADF));
    }
    Ok(())
}

fn fd_is_open(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) >= 0 }
}

/// Run one block to completion, returning the kernel-style result.
fn execute(iocb: &Iocb) -> i64 {
    let fd = iocb.aio_fildes as RawFd;
    let buf = iocb.aio_buf as *mut libc::c_void;
    let len = iocb.aio_nbytes as usize;
    let offset = iocb.aio_offset as libc::off_t;
    let flags = iocb.aio_rw_flags;

    loop {
        let ret = unsafe {
            match iocb.aio_lio_opcode {
                abi::IOCB_CMD_PREAD if flags == 0 => libc::pread(fd, buf, len, offset) as i64,
                abi::IOCB_CMD_PREAD => {
                    let iov = libc::iovec { iov_base: buf, iov_len: len };
                    libc::preadv2(fd, &iov, 1, offset, flags) as i64
                }
                abi::IOCB_CMD_PWRITE if flags == 0 => libc::pwrite(fd, buf, len, offset) as i64,
                abi::IOCB_CMD_PWRITE => {
                    let iov = libc::iovec { iov_base: buf, iov_len: len };
                    libc::pwritev2(fd, &iov, 1, offset, flags) as i64
                }
                abi::IOCB_CMD_FSYNC => libc::fsync(fd) as i64,
                abi::IOCB_CMD_FDSYNC => libc::fdatasync(fd) as i64,
                _ => return -(libc::EINVAL as i64),
            }
        };
        if ret >= 0 {
            return ret;
        }
        let errno = Errno::last().0;
        if errno != libc::EINTR {
            return -(errno as i64);
        }
    }
}
