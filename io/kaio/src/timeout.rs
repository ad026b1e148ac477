//! Timeout conversion for `io_getevents`.
//!
//! Millisecond timeouts become a `Duration` first, so both entry points share
//! one conversion. It keeps full nanosecond precision; only `tv_sec`
//! saturates, at `time_t::MAX`.

use std::time::Duration;

/// Interpret a boundary-style millisecond timeout. Negative means forever.
pub fn from_millis(timeout_ms: i64) -> Option<Duration> {
    u64::try_from(timeout_ms).ok().map(Duration::from_millis)
}

/// Convert a `Duration` to a kernel `timespec`.
pub fn timespec_from_duration(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: clamp_secs(d.as_secs()),
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn clamp_secs(secs: u64) -> libc::time_t {
    libc::time_t::try_from(secs).unwrap_or(libc::time_t::MAX)
}
