// ABOUTME: The Notifier contract for best-effort event emission, with broadcast and fan-out implementations.
// ABOUTME: Publishing happens after the store commit and its failure never undoes the commit.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::event::UserEvent;

/// Errors a Notifier can report. The pipeline logs these and moves on.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One-way, best-effort relay of record snapshots to downstream consumers.
///
/// There is no delivery guarantee. An `Err` tells the caller the attempt
/// failed so it can be logged; it is never a reason to fail or roll back the
/// operation that produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, event: &UserEvent) -> Result<(), NotifyError>;
}

/// A published event together with the topic it was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEvent {
    pub topic: String,
    pub event: UserEvent,
}

/// In-process notifier backed by a tokio broadcast channel.
/// Having no subscribers is not an error; the event is simply dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TopicEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TopicEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, topic: &str, event: &UserEvent) -> Result<(), NotifyError> {
        let sent = self.tx.send(TopicEvent {
            topic: topic.to_string(),
            event: event.clone(),
        });
        if sent.is_err() {
            tracing::trace!(topic, "no event subscribers");
        }
        Ok(())
    }
}

/// Publishes to several notifiers in order. Succeeds if at least one sink
/// accepted the event; each failing sink is logged.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn publish(&self, topic: &str, event: &UserEvent) -> Result<(), NotifyError> {
        let mut last_err = None;
        let mut delivered = self.sinks.is_empty();

        for (index, sink) in self.sinks.iter().enumerate() {
            match sink.publish(topic, event).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    tracing::warn!(sink = index, topic, "event sink failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        match (delivered, last_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::model::Record;
    use crate::testing::{FailingNotifier, RecordingNotifier};

    fn make_event() -> UserEvent {
        UserEvent::new(
            EventKind::Created,
            Record::new("A".to_string(), "a@x.com".to_string()),
        )
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::default();
        notifier.publish("user-events", &make_event()).await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscriber() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();
        let event = make_event();

        notifier.publish("user-events", &event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "user-events");
        assert_eq!(received.event, event);
    }

    #[tokio::test]
    async fn fanout_succeeds_when_one_sink_accepts() {
        let recorder = Arc::new(RecordingNotifier::new());
        let fanout = FanoutNotifier::new()
            .with(Arc::new(FailingNotifier))
            .with(recorder.clone());

        fanout.publish("user-events", &make_event()).await.unwrap();

        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn fanout_fails_when_every_sink_fails() {
        let fanout = FanoutNotifier::new()
            .with(Arc::new(FailingNotifier))
            .with(Arc::new(FailingNotifier));

        assert!(fanout.publish("user-events", &make_event()).await.is_err());
    }
}
