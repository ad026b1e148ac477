//! kaio - kernel asynchronous I/O contexts.
//!
//! A [`Context`] is a bounded queue of in-flight file reads, writes and
//! syncs. Requests are submitted in batches, their outcomes are collected
//! with [`Context::get_events`], and queued requests can be cancelled. An
//! optional [`Notifier`] (an eventfd) is signalled once per completion so the
//! context can be driven from an event loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use kaio::{Context, Request};
//! use std::fs::File;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let file = Arc::new(File::open("/etc/hostname")?);
//! let ctx = Context::create(32)?;
//!
//! let mut batch = vec![Request::read(file, 0, 4096).with_tag(7)];
//! let ids = ctx.submit(&mut batch)?;
//! assert_eq!(ids.len(), 1);
//!
//! for event in ctx.get_events(1, 32, Some(Duration::from_secs(1)))? {
//!     println!("tag {} -> {:?}", event.tag(), event.bytes());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Engines
//!
//! Linux native AIO is used when the kernel allows `io_setup`. Otherwise, or
//! when asked for explicitly, the same protocol runs on a small pool of
//! worker threads:
//!
//! ```no_run
//! use kaio::{Context, Engine};
//!
//! let ctx = Context::builder()
//!     .engine(Engine::Emulated)
//!     .workers(2)
//!     .build()?;
//! # Ok::<(), kaio::Error>(())
//! ```

mod abi;
mod builder;
mod context;
mod engine;
mod error;
mod event;
mod notifier;
mod request;
mod table;

pub mod config;
pub mod logging;
pub mod metrics;
pub mod timeout;

// Re-exports
pub use builder::{ContextBuilder, DEFAULT_MAX_EVENTS};
pub use context::{Context, DestroyError};
pub use engine::{Engine, native_available};
pub use error::{Error, Result};
pub use event::{CompletionEvent, Status};
pub use notifier::{Notifier, attach_notifier};
pub use request::{Opcode, Request, RequestId, RwFlags, Target};
