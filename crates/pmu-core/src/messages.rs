//! Info/warning/error message channel.
//!
//! The only user-visible reporting path out of the pipeline. Every message is
//! also emitted as a `tracing` event so it shows up in logs when nobody is
//! subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity level for process messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSeverity {
    /// Progress report.
    Info,
    /// Recoverable problem.
    Warning,
    /// A stage failed.
    Error,
}

/// A message emitted by a pipeline component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMessage {
    /// Component that raised the message (analytic label, section, signal key).
    pub source: String,
    /// How serious the message is.
    pub severity: MessageSeverity,
    /// Human-readable text.
    pub message: String,
    /// When the message was raised.
    pub timestamp: DateTime<Utc>,
}

/// Cloneable handle publishing [`ProcessMessage`]s to every subscriber.
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<ProcessMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MessageBus {
    /// Bus keeping up to `capacity` undelivered messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessMessage> {
        self.sender.subscribe()
    }

    /// Publish an info message and log it.
    pub fn info(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source = %source, "{}", message);
        self.publish(source, MessageSeverity::Info, message);
    }

    /// Publish a warning and log it.
    pub fn warn(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source = %source, "{}", message);
        self.publish(source, MessageSeverity::Warning, message);
    }

    /// Publish an error and log it.
    pub fn error(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source = %source, "{}", message);
        self.publish(source, MessageSeverity::Error, message);
    }

    fn publish(&self, source: &str, severity: MessageSeverity, message: String) {
        // No subscribers is fine; the tracing event above already recorded it.
        let _ = self.sender.send(ProcessMessage {
            source: source.to_string(),
            severity,
            message,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_messages_in_order() {
        let bus = MessageBus::new(8);
        let mut rx = bus.subscribe();

        bus.info("section-1", "started");
        bus.error("avg", "configuration failed");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.severity, MessageSeverity::Info);
        assert_eq!(first.source, "section-1");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.severity, MessageSeverity::Error);
        assert_eq!(second.message, "configuration failed");
    }

    #[test]
    fn publishing_without_subscribers_does_not_fail() {
        let bus = MessageBus::default();
        bus.warn("writer", "nobody listening");
    }
}
