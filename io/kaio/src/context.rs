//! The asynchronous I/O context.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::abi::{Iocb, IoEvent};
use crate::builder::ContextBuilder;
use crate::engine::{self, Backend, Engine};
use crate::error::{Errno, Error, Result};
use crate::event::{CompletionEvent, Status};
use crate::metrics::{
    CANCEL_TOO_LATE, CANCELLED, COMPLETED, CONTEXTS_ACTIVE, ENGINE_ERRORS, FAILED, IN_FLIGHT,
    REJECTED, SUBMITTED,
};
use crate::request::{Request, RequestId};
use crate::table::{InFlightTable, Lookup};
use crate::timeout;

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// A bounded queue of in-flight requests backed by one engine instance.
///
/// `submit`, `get_events` and `cancel` take `&self` and may be called from
/// different threads at once; share the context through an `Arc`. `destroy`
/// consumes the context, so it cannot race with anything.
pub struct Context {
    id: u32,
    max_events: usize,
    backend: Box<dyn Backend>,
    table: Mutex<InFlightTable>,
}

impl Context {
    /// Create a context for up to `max_events` concurrently in-flight
    /// requests, on the best available engine.
    pub fn create(max_events: usize) -> Result<Self> {
        ContextBuilder::new().max_events(max_events).build()
    }

    /// Create a builder for configuring the context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn open(engine: Engine, max_events: usize, workers: usize) -> Result<Self> {
        if max_events == 0 {
            return Err(Error::InvalidArgument("max_events must be positive"));
        }
        let nr_events = u32::try_from(max_events)
            .map_err(|_| Error::InvalidArgument("max_events exceeds the kernel event count"))?;

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let table = InFlightTable::with_capacity(id, max_events);
        let backend = engine::open(engine, nr_events, workers).map_err(Error::from)?;

        CONTEXTS_ACTIVE.increment();
        tracing::debug!(context = id, max_events, engine = %backend.engine(), "context created");

        Ok(Context {
            id,
            max_events,
            backend,
            table: Mutex::new(table),
        })
    }

    /// Process-unique id; every [`RequestId`] issued here carries it.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The engine actually in use.
    pub fn engine(&self) -> Engine {
        self.backend.engine()
    }

    /// Capacity fixed at creation.
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Requests currently owned by the context.
    pub fn in_flight(&self) -> usize {
        self.table.lock().len()
    }

    /// Submit requests in order.
    ///
    /// The accepted prefix is drained from `batch` and owned by the context
    /// until its completion event hands it back. Whatever was not accepted
    /// stays in `batch`, in order, still owned by the caller. Accepting fewer
    /// than offered is not an error.
    ///
    /// Fails with `ResourceExhausted` when a non-empty batch finds no free
    /// capacity, or with the translated engine error when the first request
    /// is refused; `batch` is left untouched in both cases.
    pub fn submit(&self, batch: &mut Vec<Request>) -> Result<Vec<RequestId>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut iocbs: Vec<*mut Iocb> = Vec::new();
        {
            let mut table = self.table.lock();
            let take = table.room().min(batch.len());
            if take == 0 {
                return Err(Error::ResourceExhausted("context queue is full"));
            }
            ids.reserve(take);
            iocbs.reserve(take);
            for request in batch.drain(..take) {
                let (id, iocb) = table.insert(request);
                ids.push(id);
                iocbs.push(iocb);
            }
        }

        // Safety: each block lives in a table slot that is only freed once its
        // event is reaped, a cancellation is confirmed, or it is rolled back
        // below after the engine refused it.
        let submitted = unsafe { self.backend.submit(&mut iocbs) };

        let accepted = match submitted {
            Ok(n) => n.min(ids.len()),
            Err(e) => {
                ENGINE_ERRORS.increment();
                self.roll_back(&ids, batch);
                tracing::debug!(context = self.id, errno = e.0, "submit refused");
                return Err(e.into());
            }
        };

        if accepted < ids.len() {
            let rejected = ids.split_off(accepted);
            self.roll_back(&rejected, batch);
            REJECTED.add(rejected.len() as u64);
            tracing::trace!(
                context = self.id,
                accepted,
                rejected = rejected.len(),
                "partial submit"
            );
        }

        SUBMITTED.add(accepted as u64);
        IN_FLIGHT.add(accepted as i64);
        Ok(ids)
    }

    /// Move refused requests back to the front of `batch`, in order.
    fn roll_back(&self, ids: &[RequestId], batch: &mut Vec<Request>) {
        let mut table = self.table.lock();
        let returned: Vec<Request> = ids
            .iter()
            .filter_map(|id| table.remove(*id))
            .map(|entry| entry.request)
            .collect();
        batch.splice(0..0, returned);
    }

    /// Wait for completions.
    ///
    /// Returns once `min` events are ready, `max` events are ready, or
    /// `timeout` elapses. `None` waits indefinitely; `Some(Duration::ZERO)`
    /// never blocks. A timeout with nothing ready is an empty `Ok`.
    pub fn get_events(
        &self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<CompletionEvent>> {
        if max == 0 {
            return Err(Error::InvalidArgument("max must be positive"));
        }
        if min > max {
            return Err(Error::InvalidArgument("min must not exceed max"));
        }
        // No more than `max_events` requests can ever be outstanding.
        let max = max.min(self.max_events);
        let min = min.min(max);

        let mut raw: Vec<IoEvent> = Vec::new();
        if let Err(e) = self.backend.get_events(min, max, timeout, &mut raw) {
            ENGINE_ERRORS.increment();
            return Err(e.into());
        }
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::with_capacity(raw.len());
        let mut table = self.table.lock();
        for ev in raw {
            let Some((id, entry)) = table.remove_completed(ev.data) else {
                tracing::warn!(context = self.id, data = ev.data, "event for unknown request");
                continue;
            };
            let cancelled = ev.res == -(libc::ECANCELED as i64) || entry.cancel_requested;
            let status = if cancelled {
                CANCELLED.increment();
                Status::Cancelled
            } else {
                COMPLETED.increment();
                if ev.res < 0 {
                    FAILED.increment();
                }
                Status::Completed
            };
            events.push(CompletionEvent {
                id,
                tag: entry.request.tag(),
                result: ev.res,
                status,
                request: Some(entry.request),
            });
        }
        drop(table);

        IN_FLIGHT.sub(events.len() as i64);
        Ok(events)
    }

    /// [`get_events`](Self::get_events) with a millisecond timeout; negative
    /// waits indefinitely.
    pub fn get_events_millis(
        &self,
        min: usize,
        max: usize,
        timeout_ms: i64,
    ) -> Result<Vec<CompletionEvent>> {
        self.get_events(min, max, timeout::from_millis(timeout_ms))
    }

    /// Try to stop an in-flight request.
    ///
    /// Fails with `NotFound` for ids this context never issued. Otherwise the
    /// returned event says what happened: `Cancelled` (the request is handed
    /// back and will not be reported again), `CancelPending` (the `Cancelled`
    /// event arrives through `get_events`), or `TooLate` (the request already
    /// resolved, or can no longer be stopped and will complete normally).
    pub fn cancel(&self, id: RequestId) -> Result<CompletionEvent> {
        let mut table = self.table.lock();
        let (iocb, tag): (*mut Iocb, u64) = match table.lookup(id) {
            Lookup::Unknown => return Err(Error::NotFound),
            Lookup::Resolved => {
                CANCEL_TOO_LATE.increment();
                return Ok(CompletionEvent::too_late(id, 0));
            }
            Lookup::InFlight(entry) => {
                entry.cancel_requested = true;
                (&mut *entry.iocb, entry.request.tag())
            }
        };

        // The table lock is held across the call, so the block cannot be
        // reaped and its address reused by another request meanwhile.
        // Safety: `iocb` is the pointer handed to `submit` for this request.
        let result = unsafe { self.backend.cancel(iocb) };
        if !matches!(result, Ok(_) | Err(Errno(libc::EINPROGRESS)))
            && let Lookup::InFlight(entry) = table.lookup(id)
        {
            entry.cancel_requested = false;
        }

        match result {
            Ok(ev) => {
                let Some(entry) = table.remove(id) else {
                    return Err(Error::NotFound);
                };
                drop(table);
                CANCELLED.increment();
                IN_FLIGHT.decrement();
                tracing::trace!(context = self.id, %id, "cancelled");
                Ok(CompletionEvent {
                    id,
                    tag: entry.request.tag(),
                    result: ev.res,
                    status: Status::Cancelled,
                    request: Some(entry.request),
                })
            }
            Err(Errno(libc::EINPROGRESS)) => Ok(CompletionEvent::cancel_pending(id, tag)),
            Err(Errno(libc::EAGAIN)) | Err(Errno(libc::EINVAL)) => {
                CANCEL_TOO_LATE.increment();
                Ok(CompletionEvent::too_late(id, tag))
            }
            Err(e) => {
                ENGINE_ERRORS.increment();
                Err(e.into())
            }
        }
    }

    /// Release the context.
    ///
    /// Fails with `StillBusy` while requests are in flight; the context is
    /// handed back inside the error so the caller can drain it and retry.
    /// Engine failures are translated, and the context is gone either way.
    pub fn destroy(mut self) -> std::result::Result<(), DestroyError> {
        let outstanding = self.in_flight();
        if outstanding > 0 {
            return Err(DestroyError {
                error: Error::StillBusy(outstanding),
                context: Some(Box::new(self)),
            });
        }
        let result = self.backend.destroy();
        tracing::debug!(context = self.id, "context destroyed");
        result.map_err(|e| DestroyError {
            error: e.into(),
            context: None,
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Waits for anything still running before the table, and with it
        // every buffer, is freed.
        if let Err(e) = self.backend.destroy() {
            tracing::warn!(context = self.id, errno = e.0, "engine teardown failed");
        }
        let abandoned = self.table.get_mut().len();
        if abandoned > 0 {
            tracing::debug!(context = self.id, abandoned, "dropped with requests in flight");
            IN_FLIGHT.sub(abandoned as i64);
        }
        CONTEXTS_ACTIVE.decrement();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("engine", &self.engine())
            .field("max_events", &self.max_events)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Failure from [`Context::destroy`].
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DestroyError {
    error: Error,
    context: Option<Box<Context>>,
}

impl DestroyError {
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// The context, when destruction was refused and it is still usable.
    pub fn into_context(self) -> Option<Context> {
        self.context.map(|c| *c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;

    fn emulated(max_events: usize) -> Context {
        Context::builder()
            .engine(Engine::Emulated)
            .max_events(max_events)
            .workers(1)
            .build()
            .unwrap()
    }

    fn scratch(len: usize) -> Arc<File> {
        let mut file = tempfile::tempfile().unwrap();
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        file.write_all(&data).unwrap();
        Arc::new(file)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Context::create(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        let result = Context::builder()
            .engine(Engine::Emulated)
            .max_events(u32::MAX as usize + 1)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_ids_are_distinct_per_context() {
        let a = emulated(1);
        let b = emulated(1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_empty_batch() {
        let ctx = emulated(1);
        let mut batch = Vec::new();
        assert!(ctx.submit(&mut batch).unwrap().is_empty());
    }

    #[test]
    fn test_full_queue() {
        let ctx = emulated(1);
        let file = scratch(16);
        let mut batch = vec![Request::read(file.clone(), 0, 4)];
        assert_eq!(ctx.submit(&mut batch).unwrap().len(), 1);

        let mut batch = vec![Request::read(file, 4, 4)];
        assert!(matches!(
            ctx.submit(&mut batch),
            Err(Error::ResourceExhausted(_))
        ));
        assert_eq!(batch.len(), 1);

        let events = ctx.get_events(1, 1, None).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_refused_batch_is_returned() {
        struct Stale;
        impl std::os::fd::AsRawFd for Stale {
            fn as_raw_fd(&self) -> std::os::fd::RawFd {
                -1
            }
        }

        let ctx = emulated(4);
        let stale = Arc::new(Stale);
        let mut batch = vec![
            Request::read(stale.clone(), 0, 8).with_tag(1),
            Request::read(stale, 8, 8).with_tag(2),
        ];

        let result = ctx.submit(&mut batch);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].tag(), 1);
        assert_eq!(batch[1].tag(), 2);
        assert_eq!(ctx.in_flight(), 0);
    }

    #[test]
    fn test_get_events_argument_checks() {
        let ctx = emulated(2);
        assert!(matches!(
            ctx.get_events(0, 0, Some(Duration::ZERO)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ctx.get_events(3, 2, Some(Duration::ZERO)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cancel_foreign_id() {
        let a = emulated(2);
        let b = emulated(2);
        let file = scratch(16);
        let mut batch = vec![Request::read(file, 0, 4)];
        let ids = a.submit(&mut batch).unwrap();

        assert!(matches!(b.cancel(ids[0]), Err(Error::NotFound)));

        a.get_events(1, 1, None).unwrap();
    }

    #[test]
    fn test_destroy_busy_returns_context() {
        let ctx = emulated(2);
        let file = scratch(16);
        let mut batch = vec![Request::read(file, 0, 4)];
        ctx.submit(&mut batch).unwrap();

        let err = ctx.destroy().unwrap_err();
        assert_eq!(err.error(), &Error::StillBusy(1));
        let ctx = err.into_context().unwrap();

        assert_eq!(ctx.get_events(1, 1, None).unwrap().len(), 1);
        ctx.destroy().unwrap();
    }

    #[test]
    fn test_debug() {
        let ctx = emulated(3);
        let s = format!("{:?}", ctx);
        assert!(s.contains("Context"));
        assert!(s.contains("max_events: 3"));
    }

    /// Accepts everything, answers every cancel with `cancel_errno`, and
    /// completes submitted blocks in full on the next `get_events`.
    struct Scripted {
        cancel_errno: i32,
        queued: Mutex<Vec<Iocb>>,
    }

    impl Backend for Scripted {
        fn engine(&self) -> Engine {
            Engine::Emulated
        }

        unsafe fn submit(&self, iocbs: &mut [*mut Iocb]) -> engine::RawResult<usize> {
            let mut queued = self.queued.lock();
            for &iocb in iocbs.iter() {
                queued.push(unsafe { *iocb });
            }
            Ok(iocbs.len())
        }

        fn get_events(
            &self,
            _min: usize,
            max: usize,
            _timeout: Option<Duration>,
            out: &mut Vec<IoEvent>,
        ) -> engine::RawResult<()> {
            let mut queued = self.queued.lock();
            let n = max.min(queued.len());
            out.extend(queued.drain(..n).map(|iocb| IoEvent {
                data: iocb.aio_data,
                res: iocb.aio_nbytes as i64,
                ..Default::default()
            }));
            Ok(())
        }

        unsafe fn cancel(&self, _iocb: *mut Iocb) -> engine::RawResult<IoEvent> {
            Err(Errno(self.cancel_errno))
        }

        fn destroy(&mut self) -> engine::RawResult<()> {
            Ok(())
        }
    }

    fn scripted(cancel_errno: i32) -> Context {
        CONTEXTS_ACTIVE.increment();
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        Context {
            id,
            max_events: 4,
            backend: Box::new(Scripted {
                cancel_errno,
                queued: Mutex::new(Vec::new()),
            }),
            table: Mutex::new(InFlightTable::with_capacity(id, 4)),
        }
    }

    #[test]
    fn test_failed_cancel_completes_normally() {
        let ctx = scripted(libc::EBADF);
        let file = scratch(16);
        let mut batch = vec![Request::read(file, 0, 8).with_tag(3)];
        let ids = ctx.submit(&mut batch).unwrap();

        assert!(matches!(ctx.cancel(ids[0]), Err(Error::InvalidArgument(_))));

        let events = ctx.get_events(1, 1, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status(), Status::Completed);
        assert_eq!(events[0].bytes(), Some(8));
    }

    #[test]
    fn test_pending_cancel_keeps_tag() {
        let ctx = scripted(libc::EINPROGRESS);
        let file = scratch(16);
        let mut batch = vec![Request::read(file, 0, 8).with_tag(41)];
        let ids = ctx.submit(&mut batch).unwrap();

        let event = ctx.cancel(ids[0]).unwrap();
        assert_eq!(event.status(), Status::CancelPending);
        assert_eq!(event.tag(), 41);

        let events = ctx.get_events(1, 1, None).unwrap();
        assert_eq!(events[0].status(), Status::Cancelled);
        assert_eq!(events[0].tag(), 41);
    }

    #[test]
    fn test_too_late_cancel_keeps_tag() {
        let ctx = scripted(libc::EAGAIN);
        let file = scratch(16);
        let mut batch = vec![Request::read(file, 0, 8).with_tag(12)];
        let ids = ctx.submit(&mut batch).unwrap();

        let event = ctx.cancel(ids[0]).unwrap();
        assert_eq!(event.status(), Status::TooLate);
        assert_eq!(event.tag(), 12);

        let events = ctx.get_events(1, 1, None).unwrap();
        assert_eq!(events[0].status(), Status::Completed);
        assert_eq!(events[0].tag(), 12);
    }
}
