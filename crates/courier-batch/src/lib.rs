//! Courier batching core
//!
//! This crate provides the message batching pipeline:
//! - Batcher: per-channel queues with size/time flush triggers and bounded
//!   concurrent dispatch across registered processors
//! - Processor: the sink contract, with an optional synchronous path
//! - ProcessorRegistry: unique-name, insertion-ordered processor set
//! - ErrorClassifier: pattern registry with windowed aggregation of
//!   recurring matches
//! - Fifo: the order-preserving queue primitive behind the batcher

pub mod batcher;
pub mod classify;
pub mod error;
pub mod fifo;
pub mod processor;

pub use batcher::{create_batcher, create_batcher_with, get_batcher, Batcher};
pub use classify::{
    add_error_patterns, classify_message, clear_error_patterns, clear_error_tracking,
    format_classified_error, get_aggregated_errors, AggregatedGroup, AggregationInfo,
    AggregationWindow, ClassifiedMessage, ErrorClassifier, ErrorPattern, ErrorSeverity,
    PatternMatcher,
};
pub use error::{DispatchError, ProcessorFailure};
pub use fifo::Fifo;
pub use processor::{Processor, ProcessorRegistry};

pub use courier_common::{
    BatcherConfig, ErrorInfo, LogLevel, Notification, NotifyLevel, DEFAULT_CHANNEL,
};
