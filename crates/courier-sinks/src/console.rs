//! Console sink
//!
//! Routes each notification to the tracing subscriber at its own level.
//! Never suspends, so it also serves the synchronous flush path.

use async_trait::async_trait;
use tracing::{error, info, warn};

use courier_batch::Processor;
use courier_common::{should_log, LogLevel, Notification, NotifyLevel};

pub struct ConsoleSink {
    name: String,
    min_level: LogLevel,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_level: LogLevel::Trace,
        }
    }

    pub fn with_min_level(mut self, min_level: LogLevel) -> Self {
        self.min_level = min_level;
        self
    }

    fn emit(&self, batch: &[Notification]) {
        for message in batch {
            if !should_log(message.level.as_log_level(), self.min_level) {
                continue;
            }
            let detail = message.error.as_ref().map(|e| e.summary());
            match message.level {
                NotifyLevel::Error => error!(
                    sink = %self.name,
                    channel = %message.channel,
                    detail = ?detail,
                    "{}",
                    message.text
                ),
                NotifyLevel::Warning => warn!(
                    sink = %self.name,
                    channel = %message.channel,
                    "{}",
                    message.text
                ),
                NotifyLevel::Info | NotifyLevel::None => info!(
                    sink = %self.name,
                    channel = %message.channel,
                    "{}",
                    message.text
                ),
            }
        }
    }
}

#[async_trait]
impl Processor for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_batch(&self, batch: &[Notification]) -> anyhow::Result<()> {
        self.emit(batch);
        Ok(())
    }

    fn process_batch_sync(&self, batch: &[Notification]) -> Option<anyhow::Result<()>> {
        self.emit(batch);
        Some(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_path_is_available() {
        let sink = ConsoleSink::new("console");
        let batch = vec![Notification::new("default", "m", NotifyLevel::Info)];
        assert!(matches!(sink.process_batch_sync(&batch), Some(Ok(()))));
    }

    #[test]
    fn test_builder_sets_min_level() {
        let sink = ConsoleSink::new("console").with_min_level(LogLevel::Error);
        assert_eq!(sink.min_level, LogLevel::Error);
    }
}
