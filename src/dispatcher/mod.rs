// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher: registration, the enqueue path, and the execution state
//! machine.
//!
//! A [`Dispatcher`] binds a [`Backend`], an optional coordination store, a
//! payload codec, and a clock. Producers register targets and defer
//! invocations through the returned [`TaskHandle`]; workers drive
//! [`Dispatcher::run_once`] or [`Dispatcher::process`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use deferrable::{BackendFactory, Dispatcher, MemoryBackendFactory, TaskOptions};
//!
//! # async fn example() -> deferrable::Result<()> {
//! let backend = MemoryBackendFactory::new().create_backend_for_group("")?;
//! let dispatcher = Arc::new(Dispatcher::builder(backend).build());
//!
//! let add = dispatcher.register("math.add", TaskOptions::new(), |invocation| async move {
//!     let (x, y): (i64, i64) = invocation.args()?;
//!     println!("{}", x + y);
//!     Ok(())
//! })?;
//!
//! add.later((2, 3), serde_json::json!({})).await?;
//! dispatcher.run_once().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Delivery semantics
//!
//! At-least-once. On retry the replacement item is pushed *before* the
//! original envelope is completed; a worker dying in between leaves the
//! backend free to redeliver the original, so targets must be idempotent.

use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::backend::{Backend, Envelope};
use crate::codec::{Codec, JsonCodec};
use crate::coordination::CoordinationStore;
use crate::error::{DeferrableError, Result};
use crate::events::{Event, EventObserver};
use crate::item::{ErrorInfo, Item};
use crate::metadata::MetadataExtension;
use crate::runtime::{backoff, debounce, ttl, Clock, DebounceDecision, SystemClock};
use crate::task::{Invocation, TaskError, TaskFn, TaskHandle, TaskOptions, Value};
use crate::MAXIMUM_DELAY_SECONDS;

/// Orchestrator for deferred, distributed execution of registered targets.
pub struct Dispatcher {
    backend: Backend,
    store: Option<Arc<dyn CoordinationStore>>,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
    default_error_classes: Option<Vec<String>>,
    default_max_attempts: u32,
    /// Hostname embedded in error records, read once at build time.
    hostname: String,
    targets: RwLock<HashMap<String, TaskFn>>,
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
    extensions: RwLock<Vec<Arc<dyn MetadataExtension>>>,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self::builder(backend).build()
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder(backend: Backend) -> DispatcherBuilder {
        DispatcherBuilder::new(backend)
    }

    /// The backend this dispatcher runs against.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an async target under a symbolic method path.
    ///
    /// The path is the registry key workers resolve at execution time, so
    /// every producer and worker sharing a backend must register the same
    /// paths. Returns a [`TaskHandle`] with `call` and `later` entry points.
    ///
    /// # Errors
    ///
    /// Fails with a validation error when the options are inconsistent (see
    /// [`TaskOptions`]) or the path is already registered.
    pub fn register<F, Fut>(
        self: &Arc<Self>,
        method_path: impl Into<String>,
        options: TaskOptions,
        handler: F,
    ) -> Result<TaskHandle>
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskError>> + Send + 'static,
    {
        let method_path = method_path.into();
        self.validate_registration(&options)?;

        let handler: TaskFn = Arc::new(move |invocation| Box::pin(handler(invocation)));
        {
            let mut targets = self.targets.write();
            if targets.contains_key(&method_path) {
                return Err(DeferrableError::Validation(format!(
                    "method path {method_path} is already registered"
                )));
            }
            targets.insert(method_path.clone(), handler.clone());
        }

        Ok(TaskHandle::new(
            method_path,
            options,
            Arc::clone(self),
            handler,
        ))
    }

    /// Register an event observer. Observers are notified in registration
    /// order.
    pub fn register_event_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    /// Remove all event observers.
    pub fn clear_event_observers(&self) {
        self.observers.write().clear();
    }

    /// Register a metadata extension.
    ///
    /// # Errors
    ///
    /// Fails with a validation error when the namespace is already in use.
    pub fn register_metadata_extension(&self, extension: Arc<dyn MetadataExtension>) -> Result<()> {
        let mut extensions = self.extensions.write();
        if extensions
            .iter()
            .any(|existing| existing.namespace() == extension.namespace())
        {
            return Err(DeferrableError::Validation(format!(
                "namespace {} is already in use",
                extension.namespace()
            )));
        }
        extensions.push(extension);
        Ok(())
    }

    /// Remove all metadata extensions.
    pub fn clear_metadata_extensions(&self) {
        self.extensions.write().clear();
    }

    // =========================================================================
    // Enqueue path
    // =========================================================================

    pub(crate) async fn enqueue(
        &self,
        method_path: &str,
        options: &TaskOptions,
        args: serde_json::Value,
        kwargs: serde_json::Value,
    ) -> Result<Option<Item>> {
        let delay_seconds = options.delay_seconds.as_ref().map(Value::resolve).unwrap_or(0.0);
        let debounce_seconds = options
            .debounce_seconds
            .as_ref()
            .map(Value::resolve)
            .unwrap_or(0.0);
        let ttl_seconds = options.ttl_seconds.as_ref().map(Value::resolve).unwrap_or(0.0);
        self.validate_run_time(delay_seconds, debounce_seconds, ttl_seconds)?;

        let now = self.clock.now();
        let error_classes = options
            .error_classes
            .clone()
            .or_else(|| self.default_error_classes.clone());
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);

        let mut item = Item {
            method_path: method_path.to_string(),
            args_blob: self.codec.encode(&args)?,
            kwargs_blob: self.codec.encode(&kwargs)?,
            error_classes: self.codec.encode(&serde_json::to_value(&error_classes)?)?,
            group: self.backend.group.clone(),
            attempts: 0,
            max_attempts,
            first_push_time: now,
            last_push_time: now,
            original_delay_seconds: delay_seconds,
            original_debounce_seconds: debounce_seconds,
            original_debounce_always_delay: options.debounce_always_delay,
            original_delay: None,
            delay: None,
            use_exponential_backoff: true,
            ttl_seconds: None,
            item_queued_timestamp: None,
            debounce_skip: false,
            error: None,
            metadata: BTreeMap::new(),
        };
        backoff::apply_backoff_options(&mut item, options.use_exponential_backoff);
        if ttl_seconds > 0.0 {
            ttl::add_ttl_metadata(&mut item, ttl_seconds, now);
        }

        if debounce_seconds > 0.0 {
            self.apply_delay_and_skip_for_debounce(
                &mut item,
                debounce_seconds,
                options.debounce_always_delay,
            )
            .await;
            if item.debounce_skip {
                return Ok(None);
            }
        } else {
            item.delay = Some(delay_seconds);
        }

        // Final delay value calculated.
        item.original_delay = item.delay;

        let extensions = self.extensions.read().clone();
        for extension in &extensions {
            extension.apply(&mut item);
        }

        self.backend.queue.push(item.clone()).await?;
        self.emit(Event::Push, Some(&item));
        Ok(Some(item))
    }

    /// Modify the item in place to meet the debounce constraints: either a
    /// `delay` to apply, or `debounce_skip` marking it must not be queued.
    ///
    /// A store failure must not stop the item from being processed, so any
    /// error here forces `delay = 0` and emits `debounce_error` instead of
    /// propagating.
    async fn apply_delay_and_skip_for_debounce(
        &self,
        item: &mut Item,
        debounce_seconds: f64,
        debounce_always_delay: bool,
    ) {
        let outcome: Result<()> = async {
            let store = self.store.as_deref().ok_or_else(|| {
                DeferrableError::Store("coordination store not configured".to_string())
            })?;
            let now = self.clock.now();
            let (decision, seconds_to_delay) =
                debounce::decide(store, item, debounce_seconds, debounce_always_delay, now)
                    .await?;

            if decision == DebounceDecision::Skip {
                item.debounce_skip = true;
                self.emit(Event::DebounceHit, Some(&*item));
                return Ok(());
            }
            self.emit(Event::DebounceMiss, Some(&*item));

            match decision {
                DebounceDecision::PushNow => {
                    debounce::mark_push_now(store, item, debounce_seconds, now).await?;
                }
                DebounceDecision::PushDelayed => {
                    debounce::mark_push_delayed(
                        store,
                        item,
                        seconds_to_delay,
                        debounce_seconds,
                        now,
                    )
                    .await?;
                }
                DebounceDecision::Skip => {}
            }

            item.delay = Some(seconds_to_delay);
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            error!(
                target: "deferrable::dispatcher",
                "error while processing debounce, queueing item immediately: {err}"
            );
            item.delay = Some(0.0);
            self.emit(Event::DebounceError, Some(&*item));
        }
    }

    // =========================================================================
    // Execute path
    // =========================================================================

    /// Pop one envelope and drive [`Dispatcher::process`] end-to-end.
    ///
    /// A convenience for consumers that do not implement envelope-level
    /// heartbeats; a consumer that needs `touch` should pop and process
    /// separately.
    pub async fn run_once(&self) -> Result<()> {
        let popped = self.backend.queue.pop().await?;
        self.process(popped).await
    }

    /// Execute one popped envelope through the item state machine.
    ///
    /// The envelope is completed exactly once after the terminal decision
    /// (success, expiration, retry push, or error routing), and a `complete`
    /// event fires for every envelope that was popped.
    pub async fn process(&self, popped: Option<(Envelope, Item)>) -> Result<()> {
        let Some((envelope, mut item)) = popped else {
            self.emit(Event::Empty, None);
            return Ok(());
        };
        self.emit(Event::Pop, Some(&item));

        let error_classes = self.decode_error_classes(&item)?;

        let extensions = self.extensions.read().clone();
        for extension in &extensions {
            extension.consume(&item);
        }

        if ttl::is_expired(&item, self.clock.now()) {
            warn!(
                target: "deferrable::dispatcher",
                "deferred job dropped with expired TTL: {}",
                item.describe()
            );
            self.emit(Event::Expire, Some(&item));
            self.backend.queue.complete(&envelope).await?;
            self.emit(Event::Complete, Some(&item));
            return Ok(());
        }

        if let Err(task_error) = self.execute_target(&item).await {
            let retriable = error_classes
                .iter()
                .any(|class| class == task_error.class());
            if retriable && item.attempts + 1 < item.max_attempts {
                // The delay is computed from the index of the attempt that
                // just failed, so it reads `attempts` before the bump.
                backoff::apply_backoff_delay(&mut item, self.clock.now());
                item.attempts += 1;
                self.backend.queue.push(item.clone()).await?;
                self.emit(Event::Retry, Some(&item));
            } else {
                self.push_item_to_error_queue(&mut item, &task_error).await?;
            }
        }

        self.backend.queue.complete(&envelope).await?;
        self.emit(Event::Complete, Some(&item));
        Ok(())
    }

    async fn execute_target(&self, item: &Item) -> std::result::Result<(), TaskError> {
        let handler = self.targets.read().get(&item.method_path).cloned();
        let Some(handler) = handler else {
            return Err(TaskError::new(
                "TargetNotFound",
                format!("no registered target for {}", item.method_path),
            ));
        };
        // Payload decode failures count as execution failures: the item can
        // still be routed to the error queue for inspection.
        let args = self
            .codec
            .decode(&item.args_blob)
            .map_err(|err| TaskError::new("DeserializationError", err.to_string()))?;
        let kwargs = self
            .codec
            .decode(&item.kwargs_blob)
            .map_err(|err| TaskError::new("DeserializationError", err.to_string()))?;
        handler(Invocation { args, kwargs }).await
    }

    /// Fill the item's `error` record from the failure and push it to the
    /// error queue.
    async fn push_item_to_error_queue(
        &self,
        item: &mut Item,
        task_error: &TaskError,
    ) -> Result<()> {
        let now = self.clock.now();
        item.error = Some(ErrorInfo {
            error_type: task_error.class().to_string(),
            error_text: task_error.message().to_string(),
            traceback: Backtrace::force_capture().to_string(),
            hostname: self.hostname.clone(),
            ts: now,
            id: Uuid::new_v4().to_string(),
        });
        item.last_push_time = now;
        item.delay = None;
        self.backend.error_queue.push(item.clone()).await?;
        self.emit(Event::Error, Some(&*item));
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Checks possible at registration time, before providers can be
    /// resolved.
    fn validate_registration(&self, options: &TaskOptions) -> Result<()> {
        if options.debounce_seconds.is_some() && self.store.is_none() {
            return Err(DeferrableError::Validation(
                "a coordination store is required for debounce".to_string(),
            ));
        }
        if options.delay_seconds.is_some() && options.debounce_seconds.is_some() {
            return Err(DeferrableError::Validation(
                "cannot delay and debounce at the same time (debounce uses delay internally)"
                    .to_string(),
            ));
        }
        if options.debounce_always_delay && options.debounce_seconds.is_none() {
            return Err(DeferrableError::Validation(
                "debounce_always_delay is an option to debounce_seconds, which was not set"
                    .to_string(),
            ));
        }
        if options.max_attempts == Some(0) {
            return Err(DeferrableError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bounds checks run once all option values have been resolved.
    fn validate_run_time(
        &self,
        delay_seconds: f64,
        debounce_seconds: f64,
        ttl_seconds: f64,
    ) -> Result<()> {
        let window = 0.0..=MAXIMUM_DELAY_SECONDS;
        if !window.contains(&delay_seconds) || !window.contains(&debounce_seconds) {
            return Err(DeferrableError::Validation(format!(
                "delay or debounce window must be between 0 and {MAXIMUM_DELAY_SECONDS} seconds"
            )));
        }
        if ttl_seconds > 0.0 && (delay_seconds > ttl_seconds || debounce_seconds > ttl_seconds) {
            return Err(DeferrableError::Validation(
                "delay_seconds or debounce_seconds must be less than ttl_seconds".to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Notify every observer of an event, in registration order.
    fn emit(&self, event: Event, item: Option<&Item>) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            dispatch_event(observer.as_ref(), event, item);
        }
    }

    fn decode_error_classes(&self, item: &Item) -> Result<Vec<String>> {
        let value = self.codec.decode(&item.error_classes)?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn dispatch_event(observer: &dyn EventObserver, event: Event, item: Option<&Item>) {
    if event == Event::Empty {
        observer.on_empty(item);
        return;
    }
    let Some(item) = item else { return };
    match event {
        Event::Push => observer.on_push(item),
        Event::Pop => observer.on_pop(item),
        Event::Complete => observer.on_complete(item),
        Event::Expire => observer.on_expire(item),
        Event::Retry => observer.on_retry(item),
        Event::Error => observer.on_error(item),
        Event::DebounceHit => observer.on_debounce_hit(item),
        Event::DebounceMiss => observer.on_debounce_miss(item),
        Event::DebounceError => observer.on_debounce_error(item),
        Event::Empty => {}
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    backend: Backend,
    store: Option<Arc<dyn CoordinationStore>>,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
    default_error_classes: Option<Vec<String>>,
    default_max_attempts: u32,
}

impl DispatcherBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            store: None,
            codec: Arc::new(JsonCodec::new()),
            clock: Arc::new(SystemClock::new()),
            default_error_classes: None,
            default_max_attempts: 5,
        }
    }

    /// Set the coordination store, required for debounce.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the error tags treated as retriable when a registration does not
    /// override them.
    #[must_use]
    pub fn with_default_error_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_error_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the default maximum number of attempts.
    #[must_use]
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Build the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            backend: self.backend,
            store: self.store,
            codec: self.codec,
            clock: self.clock,
            default_error_classes: self.default_error_classes,
            default_max_attempts: self.default_max_attempts,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            targets: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            extensions: RwLock::new(Vec::new()),
        }
    }
}
