//! Fire-and-forget notification sink
//!
//! Observability only: a dropped or full receiver never affects the debate
//! outcome, so sends are unacknowledged and errors are swallowed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Debug,
    Warning,
    Error,
}

/// One observability message from the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

/// Client-side handle for emitting notifications
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    /// Create a notifier and the receiver a caller can listen on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops everything, for callers that don't listen
    pub fn sink() -> Self {
        Self { tx: None }
    }

    /// Send a notification; failures are ignored
    pub fn notify(&self, level: NotifyLevel, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Notification {
                level,
                message: message.into(),
            });
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_delivers() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.notify(NotifyLevel::Info, "round 1 started");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.level, NotifyLevel::Info);
        assert_eq!(received.message, "round 1 started");
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.notify(NotifyLevel::Error, "nobody is listening");
    }

    #[test]
    fn test_sink_discards() {
        let notifier = Notifier::sink();
        notifier.notify(NotifyLevel::Debug, "into the void");
    }
}
