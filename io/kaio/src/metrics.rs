//! Context metrics.

use metriken::{Counter, Gauge, metric};

#[metric(name = "kaio_contexts_active", description = "Number of live contexts")]
pub static CONTEXTS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "kaio_requests_in_flight",
    description = "Requests owned by a context across all contexts"
)]
pub static IN_FLIGHT: Gauge = Gauge::new();

#[metric(
    name = "kaio_requests_submitted",
    description = "Requests accepted by submit"
)]
pub static SUBMITTED: Counter = Counter::new();

#[metric(
    name = "kaio_requests_rejected",
    description = "Requests handed back to the caller by a partial submit"
)]
pub static REJECTED: Counter = Counter::new();

#[metric(
    name = "kaio_requests_completed",
    description = "Requests resolved by a completion event"
)]
pub static COMPLETED: Counter = Counter::new();

#[metric(
    name = "kaio_requests_failed",
    description = "Completed requests whose result was a negative errno"
)]
pub static FAILED: Counter = Counter::new();

#[metric(
    name = "kaio_requests_cancelled",
    description = "Requests resolved by cancellation"
)]
pub static CANCELLED: Counter = Counter::new();

#[metric(
    name = "kaio_cancel_too_late",
    description = "Cancel attempts that found the request already resolved"
)]
pub static CANCEL_TOO_LATE: Counter = Counter::new();

#[metric(
    name = "kaio_engine_errors",
    description = "Engine calls that returned an error"
)]
pub static ENGINE_ERRORS: Counter = Counter::new();
