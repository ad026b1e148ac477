//! Context builder with fluent API.

use crate::context::Context;
use crate::engine::{Engine, emulated::DEFAULT_WORKERS};
use crate::error::Result;

/// Default capacity when none is given.
pub const DEFAULT_MAX_EVENTS: usize = 128;

/// Builder for creating a context with custom configuration.
///
/// # Example
///
/// ```no_run
/// use kaio::{Context, Engine};
///
/// let ctx = Context::builder()
///     .engine(Engine::Auto)
///     .max_events(256)
///     .build()?;
/// # Ok::<(), kaio::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    engine: Engine,
    max_events: usize,
    workers: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            engine: Engine::Auto,
            max_events: DEFAULT_MAX_EVENTS,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Set the engine to use.
    ///
    /// - `Auto`: native AIO when the kernel allows it, otherwise emulated (default)
    /// - `Native`: Linux native AIO only
    /// - `Emulated`: worker threads
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the maximum number of concurrently in-flight requests.
    ///
    /// Must be positive and fit in a `u32`.
    /// Default: 128
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Set the worker thread count for the emulated engine.
    ///
    /// Ignored by the native engine. Zero is treated as one.
    /// Default: 4
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Build the context with the configured settings.
    pub fn build(self) -> Result<Context> {
        Context::open(self.engine, self.max_events, self.workers.max(1))
    }
}
