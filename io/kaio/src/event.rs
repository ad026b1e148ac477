//! Completion events.

use crate::error::Error;
use crate::request::{Request, RequestId};

/// How a request was resolved, or what a cancel attempt achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Ran to completion. `result` holds bytes transferred or a negative errno.
    Completed,
    /// Terminated early.
    Cancelled,
    /// The kernel queued the cancellation; the terminal `Cancelled` event is
    /// delivered by `get_events`.
    CancelPending,
    /// Cancellation had no effect: the request already resolved, or can no
    /// longer be stopped and will be reported normally.
    TooLate,
}

/// The outcome record for one request.
#[derive(Debug)]
pub struct CompletionEvent {
    pub(crate) id: RequestId,
    pub(crate) tag: u64,
    pub(crate) result: i64,
    pub(crate) status: Status,
    pub(crate) request: Option<Request>,
}

impl CompletionEvent {
    /// Identity of the originating request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Caller tag of the originating request. Zero when the event does not
    /// carry the request (`TooLate`, `CancelPending`).
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Raw kernel result: bytes transferred, or a negative errno.
    pub fn result(&self) -> i64 {
        self.result
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Bytes transferred, when the operation succeeded.
    pub fn bytes(&self) -> Option<usize> {
        match self.status {
            Status::Completed => usize::try_from(self.result).ok(),
            _ => None,
        }
    }

    /// The translated failure, when the result is a negative errno.
    pub fn error(&self) -> Option<Error> {
        if self.result < 0 {
            let code = i32::try_from(self.result).unwrap_or(i32::MIN);
            Some(Error::from_errno(code))
        } else {
            None
        }
    }

    /// Whether this event hands the request back to the caller.
    pub fn is_terminal(&self) -> bool {
        self.request.is_some()
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Take ownership of the resolved request.
    pub fn into_request(self) -> Option<Request> {
        self.request
    }

    pub(crate) fn too_late(id: RequestId, tag: u64) -> Self {
        CompletionEvent {
            id,
            tag,
            result: 0,
            status: Status::TooLate,
            request: None,
        }
    }

    pub(crate) fn cancel_pending(id: RequestId, tag: u64) -> Self {
        CompletionEvent {
            id,
            tag,
            result: 0,
            status: Status::CancelPending,
            request: None,
        }
    }
}
