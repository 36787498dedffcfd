//! Concrete sink processors for the Courier batching core
//!
//! Provides:
//! - WebhookSink: posts formatted batches as JSON to a chat-service webhook
//! - ConsoleSink: routes batches to the tracing subscriber, with a
//!   synchronous path for flush_sync
//!
//! Both sinks filter per-processor by a minimum log level.

pub mod console;
pub mod webhook;

pub use console::ConsoleSink;
pub use webhook::{WebhookSink, WebhookSinkConfig};
