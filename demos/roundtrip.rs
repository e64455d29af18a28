// SPDX-License-Identifier: MIT OR Apache-2.0

//! Produce a deferred invocation and execute it from a worker loop.
//!
//! Run with: `cargo run --example roundtrip`

use std::sync::Arc;

use deferrable::{
    BackendFactory, Dispatcher, Event, EventObserver, Item, MemoryBackendFactory, TaskError,
    TaskOptions,
};

struct LogObserver;

impl EventObserver for LogObserver {
    fn on_push(&self, item: &Item) {
        println!("[{}] {}", Event::Push, item.describe());
    }
    fn on_retry(&self, item: &Item) {
        println!("[{}] attempt {} of {}", Event::Retry, item.attempts, item.max_attempts);
    }
    fn on_complete(&self, item: &Item) {
        println!("[{}] {}", Event::Complete, item.describe());
    }
    fn on_error(&self, item: &Item) {
        let error = item.error.as_ref().expect("error items carry a record");
        println!("[{}] {}: {}", Event::Error, error.error_type, error.error_text);
    }
}

#[tokio::main]
async fn main() -> deferrable::Result<()> {
    tracing_subscriber::fmt::init();

    let backend = MemoryBackendFactory::new().create_backend_for_group("demo")?;
    let dispatcher = Arc::new(Dispatcher::builder(backend).build());
    dispatcher.register_event_observer(Arc::new(LogObserver));

    let greet = dispatcher.register(
        "demo.greet",
        TaskOptions::new()
            .with_error_classes(["Transient"])
            .with_max_attempts(3)
            .with_exponential_backoff(false),
        |invocation| async move {
            let (name,): (String,) = invocation.args()?;
            if name.is_empty() {
                return Err(TaskError::new("Transient", "no name yet, try again"));
            }
            println!("hello, {name}!");
            Ok(())
        },
    )?;

    greet.later(("world",), serde_json::json!({})).await?;

    // Worker side: drain the queue.
    dispatcher.run_once().await?;
    Ok(())
}
