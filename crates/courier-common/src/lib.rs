use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod logging;

/// Channel used by the severity entry points when no explicit channel is given.
pub const DEFAULT_CHANNEL: &str = "default";

// ============================================================================
// Core Message Types
// ============================================================================

/// A single notification flowing through a batcher.
///
/// Kept deliberately flat: one routing key, one payload line, a level and an
/// optional error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Opaque routing key for per-destination queueing.
    pub channel: String,
    /// Human-readable payload.
    pub text: String,
    pub level: NotifyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Notification {
    pub fn new(channel: impl Into<String>, text: impl Into<String>, level: NotifyLevel) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            level,
            error: None,
        }
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

/// Severity of a notification as tagged by the producer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
    None,
}

impl NotifyLevel {
    /// Map onto the sink-side logger scale. `Warning` normalizes to `Warn`.
    pub fn as_log_level(self) -> LogLevel {
        match self {
            NotifyLevel::Info => LogLevel::Info,
            NotifyLevel::Warning => LogLevel::Warn,
            NotifyLevel::Error => LogLevel::Error,
            NotifyLevel::None => LogLevel::None,
        }
    }
}

impl std::fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
            NotifyLevel::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// Error description attached to a notification, either free-form text or a
/// structured name/message pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorInfo {
    Text(String),
    Detail { name: String, message: String },
}

impl ErrorInfo {
    pub fn detail(name: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorInfo::Detail {
            name: name.into(),
            message: message.into(),
        }
    }

    /// One-line rendering for sink output.
    pub fn summary(&self) -> String {
        match self {
            ErrorInfo::Text(text) => text.clone(),
            ErrorInfo::Detail { name, message } => format!("{}: {}", name, message),
        }
    }
}

impl From<String> for ErrorInfo {
    fn from(text: String) -> Self {
        ErrorInfo::Text(text)
    }
}

impl From<&str> for ErrorInfo {
    fn from(text: &str) -> Self {
        ErrorInfo::Text(text.to_string())
    }
}

// ============================================================================
// Log-Level Filter
// ============================================================================

/// Sink-side logger levels, severity-ordered from `Error` down to `Trace`.
/// `None` disables logging on whichever side carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    None,
}

impl LogLevel {
    fn severity_index(self) -> Option<u8> {
        match self {
            LogLevel::Error => Some(0),
            LogLevel::Warn => Some(1),
            LogLevel::Info => Some(2),
            LogLevel::Debug => Some(3),
            LogLevel::Trace => Some(4),
            LogLevel::None => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::None => "none",
        };
        write!(f, "{}", s)
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Trace
    }
}

/// Parse a level name case-insensitively. `"warning"` is accepted as an alias
/// for `warn`; anything unrecognized falls back to `Trace`.
pub fn normalize_log_level(input: &str) -> LogLevel {
    match input.to_ascii_lowercase().as_str() {
        "error" => LogLevel::Error,
        "warn" | "warning" => LogLevel::Warn,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        "none" => LogLevel::None,
        _ => LogLevel::Trace,
    }
}

/// Whether a message at `msg_level` passes a sink configured at
/// `logger_level`. `None` on either side suppresses everything.
pub fn should_log(msg_level: LogLevel, logger_level: LogLevel) -> bool {
    match (msg_level.severity_index(), logger_level.severity_index()) {
        (Some(msg), Some(logger)) => msg <= logger,
        _ => false,
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration for a batcher instance.
///
/// The initial processor set is passed to the factory separately; trait
/// objects have no serde representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Process-wide instance key.
    pub id: String,
    /// Reuse an existing instance registered under `id` instead of creating
    /// a second one.
    pub singleton: bool,
    /// Size trigger per channel.
    pub max_batch_size: usize,
    /// Time trigger per channel, measured from the first message into an
    /// empty channel.
    pub max_wait_ms: u64,
    /// Maximum processor invocations in flight for one dispatched batch.
    pub concurrent_processors: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_CHANNEL.to_string(),
            singleton: true,
            max_batch_size: 100,
            max_wait_ms: 60_000,
            concurrent_processors: 3,
        }
    }
}

impl BatcherConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_log_severity_ordering() {
        assert!(should_log(LogLevel::Error, LogLevel::Warn));
        assert!(should_log(LogLevel::Warn, LogLevel::Warn));
        assert!(!should_log(LogLevel::Info, LogLevel::Warn));
        assert!(should_log(LogLevel::Trace, LogLevel::Trace));
    }

    #[test]
    fn test_should_log_none_suppresses() {
        assert!(!should_log(LogLevel::None, LogLevel::Trace));
        assert!(!should_log(LogLevel::Error, LogLevel::None));
        assert!(!should_log(LogLevel::None, LogLevel::None));
    }

    #[test]
    fn test_normalize_log_level() {
        assert_eq!(normalize_log_level("ERROR"), LogLevel::Error);
        assert_eq!(normalize_log_level("warning"), LogLevel::Warn);
        assert_eq!(normalize_log_level("none"), LogLevel::None);
        assert_eq!(normalize_log_level("bogus"), LogLevel::Trace);
        assert_eq!(normalize_log_level(""), LogLevel::Trace);
    }

    #[test]
    fn test_notify_level_normalizes_to_warn() {
        assert_eq!(NotifyLevel::Warning.as_log_level(), LogLevel::Warn);
        assert_eq!(NotifyLevel::None.as_log_level(), LogLevel::None);
    }

    #[test]
    fn test_config_defaults() {
        let config = BatcherConfig::default();
        assert_eq!(config.id, "default");
        assert!(config.singleton);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.max_wait(), Duration::from_secs(60));
        assert_eq!(config.concurrent_processors, 3);
    }

    #[test]
    fn test_config_partial_deserialization() {
        let config: BatcherConfig =
            serde_json::from_str(r#"{"max_batch_size": 5, "max_wait_ms": 100}"#).unwrap();
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.max_wait_ms, 100);
        assert_eq!(config.concurrent_processors, 3);
        assert!(config.singleton);
    }

    #[test]
    fn test_error_info_summary() {
        let text: ErrorInfo = "boom".into();
        assert_eq!(text.summary(), "boom");

        let detail = ErrorInfo::detail("TimeoutError", "request timed out");
        assert_eq!(detail.summary(), "TimeoutError: request timed out");
    }

    #[test]
    fn test_error_info_untagged_serde() {
        let text: ErrorInfo = serde_json::from_str(r#""boom""#).unwrap();
        assert_eq!(text, ErrorInfo::Text("boom".to_string()));

        let detail: ErrorInfo =
            serde_json::from_str(r#"{"name": "E", "message": "m"}"#).unwrap();
        assert_eq!(detail, ErrorInfo::detail("E", "m"));
    }
}
