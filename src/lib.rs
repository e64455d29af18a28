// SPDX-License-Identifier: MIT OR Apache-2.0

//! # deferrable
//!
//! Deferred, distributed execution of named functions over pluggable queue
//! backends.
//!
//! ## Features
//!
//! - **Deferred invocation** — register a target, call `later(...)`, and any
//!   worker sharing the backend executes it
//! - **Async-first** — Built on `tokio`
//! - **Retries with backoff** — tagged error classification, exponential
//!   backoff, an error queue for exhausted or fatal failures
//! - **Debounce** — coalesce bursts of identical invocations through a
//!   coordination store
//! - **TTL** — wall-clock lifecycle budgets, enforced at pop time
//! - **Observable** — named lifecycle events, `tracing` logging
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use deferrable::{BackendFactory, Dispatcher, MemoryBackendFactory, TaskOptions};
//!
//! # async fn example() -> deferrable::Result<()> {
//! let backend = MemoryBackendFactory::new().create_backend_for_group("emails")?;
//! let dispatcher = Arc::new(Dispatcher::builder(backend).build());
//!
//! let send = dispatcher.register(
//!     "emails.send_welcome",
//!     TaskOptions::new()
//!         .with_error_classes(["SmtpUnavailable"])
//!         .with_max_attempts(3),
//!     |invocation| async move {
//!         let (address,): (String,) = invocation.args()?;
//!         println!("sending welcome mail to {address}");
//!         Ok(())
//!     },
//! )?;
//!
//! // Producer side: defer the invocation.
//! send.later(("user@example.com",), serde_json::json!({})).await?;
//!
//! // Worker side: pop one envelope and execute it.
//! dispatcher.run_once().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`dispatcher`] — Registration, the enqueue path, and the execution state machine
//! - [`backend`] — Queue contract, envelopes, and the in-memory reference backend
//! - [`coordination`] — TTL-aware key/value store backing the debounce engine
//! - [`runtime`] — Backoff, TTL, and debounce policies plus the injectable clock
//! - [`task`] — Options, handles, and tagged execution errors
//! - [`events`] — Lifecycle events and observers
//! - [`metadata`] — Per-item metadata extensions
//! - [`codec`] — Payload codecs
//! - [`item`] — The serialized invocation record
//! - [`error`] — Error types
//! - [`testkit`] — Testing utilities
//!
//! ## Delivery semantics
//!
//! At-least-once: a retry pushes the replacement item before the original
//! envelope is completed, and error-queue pops are non-destructive. Targets
//! are expected to be idempotent.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod codec;
pub mod coordination;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod item;
pub mod metadata;
pub mod runtime;
pub mod task;
pub mod testkit;

/// Upper bound on any applied delay or debounce window, in seconds.
pub const MAXIMUM_DELAY_SECONDS: f64 = 604_800.0;

pub use backend::memory::{MemoryBackendFactory, MemoryErrorQueue, MemoryQueue};
pub use backend::{
    queue_name, Backend, BackendFactory, Envelope, Queue, QueueCapabilities, QueueStats,
};
pub use codec::{Codec, JsonCodec};
pub use coordination::{CoordinationStore, MemoryStore};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{DeferrableError, Result};
pub use events::{Event, EventObserver};
pub use item::{ErrorInfo, Item};
pub use metadata::MetadataExtension;
pub use runtime::backoff::{BACKOFF_BASE, BACKOFF_CONSTANT};
pub use runtime::{Clock, DebounceDecision, SystemClock};
pub use task::{Invocation, TaskError, TaskHandle, TaskOptions, Value};
