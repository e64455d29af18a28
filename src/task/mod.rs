// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task registration surface: options, handles, and execution errors.
//!
//! A target function is registered under a symbolic `method_path` together
//! with its [`TaskOptions`]. Registration returns a [`TaskHandle`] carrying
//! both entry points: `call` runs the target directly, `later` defers it
//! through the dispatcher.
//!
//! Failures inside a target are [`TaskError`]s: a tagged error value whose
//! `class` is matched against the item's retriable classes to decide between
//! retry and error-queue routing.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::dispatcher::Dispatcher;
use crate::item::Item;

/// Tagged execution error returned by targets.
///
/// The `class` is the retry-classification tag; an item retries when its
/// `error_classes` list contains the class, and is routed to the error queue
/// otherwise.
#[derive(Debug, Clone, Error)]
#[error("{class}: {message}")]
pub struct TaskError {
    class: String,
    message: String,
}

impl TaskError {
    /// Create an error with a classification tag and a message.
    #[must_use]
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// The classification tag.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Decoded invocation payload handed to a target.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Positional arguments.
    pub args: serde_json::Value,
    /// Named arguments.
    pub kwargs: serde_json::Value,
}

impl Invocation {
    /// Decode the positional arguments into a concrete type.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.args.clone())
            .map_err(|err| TaskError::new("DeserializationError", err.to_string()))
    }

    /// Decode the named arguments into a concrete type.
    pub fn kwargs<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.kwargs.clone())
            .map_err(|err| TaskError::new("DeserializationError", err.to_string()))
    }
}

/// Type-erased async target function.
pub type TaskFn =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// An option that is either a constant or a provider resolved at each
/// `later` invocation.
pub enum Value<T> {
    /// A fixed value.
    Const(T),
    /// A zero-argument provider called at resolution time.
    Provider(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Value<T> {
    /// Resolve to a concrete value.
    #[must_use]
    pub fn resolve(&self) -> T {
        match self {
            Value::Const(value) => value.clone(),
            Value::Provider(provider) => provider(),
        }
    }
}

impl<T> Value<T> {
    /// Wrap a provider function.
    #[must_use]
    pub fn provider(provider: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Value::Provider(Arc::new(provider))
    }
}

impl<T> Clone for Value<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Value::Const(value) => Value::Const(value.clone()),
            Value::Provider(provider) => Value::Provider(provider.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(value) => f.debug_tuple("Const").field(value).finish(),
            Value::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Per-registration execution options.
///
/// Time options accept either a constant or a provider; providers are
/// resolved and bounds-checked at each `later` invocation.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Error tags treated as retriable; anything else is immediately fatal.
    pub error_classes: Option<Vec<String>>,
    /// Overrides the dispatcher default.
    pub max_attempts: Option<u32>,
    /// Fixed initial delay. Mutually exclusive with `debounce_seconds`.
    pub delay_seconds: Option<Value<f64>>,
    /// Enables the debounce engine.
    pub debounce_seconds: Option<Value<f64>>,
    /// Always delay by the full window instead of spreading. Only valid
    /// alongside `debounce_seconds`.
    pub debounce_always_delay: bool,
    /// Wall-clock budget for the whole lifecycle.
    pub ttl_seconds: Option<Value<f64>>,
    /// Apply exponential backoff on retries.
    pub use_exponential_backoff: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            error_classes: None,
            max_attempts: None,
            delay_seconds: None,
            debounce_seconds: None,
            debounce_always_delay: false,
            ttl_seconds: None,
            use_exponential_backoff: true,
        }
    }
}

impl TaskOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retriable error tags.
    #[must_use]
    pub fn with_error_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    /// Override the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set a fixed initial delay in seconds.
    #[must_use]
    pub fn with_delay_seconds(mut self, delay_seconds: f64) -> Self {
        self.delay_seconds = Some(Value::Const(delay_seconds));
        self
    }

    /// Set a per-invocation delay provider.
    #[must_use]
    pub fn with_delay_provider(
        mut self,
        provider: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.delay_seconds = Some(Value::provider(provider));
        self
    }

    /// Set the debounce window in seconds.
    #[must_use]
    pub fn with_debounce_seconds(mut self, debounce_seconds: f64) -> Self {
        self.debounce_seconds = Some(Value::Const(debounce_seconds));
        self
    }

    /// Set a per-invocation debounce window provider.
    #[must_use]
    pub fn with_debounce_provider(
        mut self,
        provider: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.debounce_seconds = Some(Value::provider(provider));
        self
    }

    /// Always delay debounced pushes by the full window.
    #[must_use]
    pub fn with_debounce_always_delay(mut self, always_delay: bool) -> Self {
        self.debounce_always_delay = always_delay;
        self
    }

    /// Set the TTL in seconds.
    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl_seconds: f64) -> Self {
        self.ttl_seconds = Some(Value::Const(ttl_seconds));
        self
    }

    /// Set a per-invocation TTL provider.
    #[must_use]
    pub fn with_ttl_provider(mut self, provider: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.ttl_seconds = Some(Value::provider(provider));
        self
    }

    /// Enable or disable exponential backoff on retries.
    #[must_use]
    pub fn with_exponential_backoff(mut self, use_exponential_backoff: bool) -> Self {
        self.use_exponential_backoff = use_exponential_backoff;
        self
    }
}

/// Wrapper handle returned by registration.
///
/// Carries the target, its options, and the dispatcher; the original
/// function remains directly callable through [`TaskHandle::call`].
#[derive(Clone)]
pub struct TaskHandle {
    method_path: String,
    options: TaskOptions,
    dispatcher: Arc<Dispatcher>,
    handler: TaskFn,
}

impl TaskHandle {
    pub(crate) fn new(
        method_path: String,
        options: TaskOptions,
        dispatcher: Arc<Dispatcher>,
        handler: TaskFn,
    ) -> Self {
        Self {
            method_path,
            options,
            dispatcher,
            handler,
        }
    }

    /// The registry key this handle was registered under.
    #[must_use]
    pub fn method_path(&self) -> &str {
        &self.method_path
    }

    /// The registration options.
    #[must_use]
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Invoke the target directly, bypassing the queue.
    pub async fn call(
        &self,
        args: impl Serialize,
        kwargs: impl Serialize,
    ) -> crate::error::Result<()> {
        let invocation = Invocation {
            args: serde_json::to_value(args)?,
            kwargs: serde_json::to_value(kwargs)?,
        };
        (self.handler)(invocation).await?;
        Ok(())
    }

    /// Defer the invocation through the dispatcher.
    ///
    /// Returns the pushed item, or `None` when the debounce engine decided
    /// to skip the push.
    pub async fn later(
        &self,
        args: impl Serialize,
        kwargs: impl Serialize,
    ) -> crate::error::Result<Option<Item>> {
        self.dispatcher
            .enqueue(
                &self.method_path,
                &self.options,
                serde_json::to_value(args)?,
                serde_json::to_value(kwargs)?,
            )
            .await
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("method_path", &self.method_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::new("NetErr", "connection reset");
        assert_eq!(err.to_string(), "NetErr: connection reset");
        assert_eq!(err.class(), "NetErr");
        assert_eq!(err.message(), "connection reset");
    }

    #[test]
    fn test_invocation_decodes_typed_args() {
        let invocation = Invocation {
            args: json!([2, 3]),
            kwargs: json!({"scale": 10}),
        };
        let (x, y): (i64, i64) = invocation.args().unwrap();
        assert_eq!((x, y), (2, 3));

        #[derive(serde::Deserialize)]
        struct Kwargs {
            scale: i64,
        }
        let kwargs: Kwargs = invocation.kwargs().unwrap();
        assert_eq!(kwargs.scale, 10);
    }

    #[test]
    fn test_invocation_decode_failure_is_tagged() {
        let invocation = Invocation {
            args: json!("definitely not a pair"),
            kwargs: json!({}),
        };
        let err = invocation.args::<(i64, i64)>().unwrap_err();
        assert_eq!(err.class(), "DeserializationError");
    }

    #[test]
    fn test_value_const_resolves() {
        assert_eq!(Value::Const(5.0).resolve(), 5.0);
    }

    #[test]
    fn test_value_provider_resolves_each_time() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let counter = Arc::new(AtomicU64::new(0));
        let counter_in_provider = counter.clone();
        let value = Value::provider(move || {
            counter_in_provider.fetch_add(1, Ordering::SeqCst) as f64
        });
        assert_eq!(value.resolve(), 0.0);
        assert_eq!(value.resolve(), 1.0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_options_default_to_exponential_backoff() {
        let options = TaskOptions::default();
        assert!(options.use_exponential_backoff);
        assert!(options.delay_seconds.is_none());
        assert!(options.debounce_seconds.is_none());
    }

    #[test]
    fn test_options_builder() {
        let options = TaskOptions::new()
            .with_error_classes(["NetErr", "Timeout"])
            .with_max_attempts(3)
            .with_delay_seconds(5.0)
            .with_exponential_backoff(false);

        assert_eq!(
            options.error_classes.as_deref(),
            Some(&["NetErr".to_string(), "Timeout".to_string()][..])
        );
        assert_eq!(options.max_attempts, Some(3));
        assert_eq!(options.delay_seconds.unwrap().resolve(), 5.0);
        assert!(!options.use_exponential_backoff);
    }
}
