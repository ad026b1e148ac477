//! Engines behind a context.
//!
//! A [`Backend`] is the raw queue: it accepts encoded control blocks, reports
//! `io_event`s, and cancels by control block address. All bookkeeping
//! (capacity, ownership, correlation) lives in the context above it, so both
//! engines share one protocol implementation.

pub(crate) mod emulated;
#[cfg(target_os = "linux")]
pub(crate) mod native;

use std::time::Duration;

use serde::Deserialize;

use crate::abi::{Iocb, IoEvent};
use crate::error::Errno;

/// Result of a raw engine call: positive errno on failure, untranslated.
pub(crate) type RawResult<T> = std::result::Result<T, Errno>;

/// Engine selection.
///
/// Accepts: "auto", "native" (also "aio", "linux"), "emulated" (also
/// "threads", "threadpool").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Use native AIO when `io_setup` succeeds, otherwise emulate.
    #[default]
    Auto,
    /// Linux `io_setup`/`io_submit`/`io_getevents`. Fails where unavailable.
    #[serde(alias = "aio", alias = "linux")]
    Native,
    /// Worker threads running positioned reads and writes.
    #[serde(alias = "threads", alias = "threadpool")]
    Emulated,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Auto => write!(f, "auto"),
            Engine::Native => write!(f, "native"),
            Engine::Emulated => write!(f, "emulated"),
        }
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Engine::Auto),
            "native" | "aio" | "linux" => Ok(Engine::Native),
            "emulated" | "threads" | "threadpool" => Ok(Engine::Emulated),
            _ => Err(format!("unknown engine: {}", s)),
        }
    }
}

/// The raw queue under a context.
///
/// Calls may arrive concurrently from several threads, except `destroy`,
/// which the context only calls with exclusive access.
pub(crate) trait Backend: Send + Sync {
    /// The concrete engine, never `Auto`.
    fn engine(&self) -> Engine;

    /// Queue control blocks in order. Returns how many were accepted; an
    /// error means the first one was refused.
    ///
    /// # Safety
    /// Every pointer must reference a live control block whose buffer stays
    /// valid until its event is reaped or its cancellation is confirmed.
    unsafe fn submit(&self, iocbs: &mut [*mut Iocb]) -> RawResult<usize>;

    /// Wait for between `min` and `max` events, or until `timeout`.
    /// `None` waits indefinitely.
    fn get_events(
        &self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
        out: &mut Vec<IoEvent>,
    ) -> RawResult<()>;

    /// Attempt to cancel the queued block at `iocb`. `Ok(event)` means it was
    /// cancelled synchronously and will not be reported again; `EINPROGRESS`
    /// means its cancelled event will be.
    ///
    /// # Safety
    /// `iocb` must be the exact pointer passed to `submit`.
    unsafe fn cancel(&self, iocb: *mut Iocb) -> RawResult<IoEvent>;

    /// Release engine resources, waiting for operations still running.
    /// Idempotent.
    fn destroy(&mut self) -> RawResult<()>;
}

/// Build the backend for `engine`.
pub(crate) fn open(engine: Engine, max_events: u32, workers: usize) -> RawResult<Box<dyn Backend>> {
    match engine {
        Engine::Auto => {
            #[cfg(target_os = "linux")]
            {
                match native::NativeAio::setup(max_events) {
                    Ok(aio) => return Ok(Box::new(aio)),
                    Err(e) if is_unavailable(e) => {
                        tracing::debug!(
                            errno = e.0,
                            "native aio unavailable, falling back to emulated engine"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(Box::new(emulated::EmulatedAio::start(max_events, workers)?))
        }
        Engine::Native => {
            #[cfg(target_os = "linux")]
            {
                Ok(Box::new(native::NativeAio::setup(max_events)?))
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(Errno(libc::ENOSYS))
            }
        }
        Engine::Emulated => Ok(Box::new(emulated::EmulatedAio::start(max_events, workers)?)),
    }
}

/// Setup failures that mean "this kernel or sandbox has no native AIO"
/// rather than "the request was bad".
fn is_unavailable(e: Errno) -> bool {
    matches!(e.0, libc::ENOSYS | libc::EPERM | libc::EACCES)
}

/// Whether native AIO can be set up on this system.
pub fn native_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        native::NativeAio::setup(1).is_ok()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
