//! Lifecycle notifications.
//!
//! The lifecycle manager publishes here whenever a transition completes; UI
//! shells and tests subscribe and observe status changes without polling.

use crate::environment::Environment;
use crate::log_debug;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of events buffered per subscriber.
const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    EnvironmentUpdated { environment: Environment },
    EnvironmentDeleted { id: Uuid },
}

impl LifecycleEvent {
    pub fn environment_id(&self) -> Uuid {
        match self {
            LifecycleEvent::EnvironmentUpdated { environment } => environment.id,
            LifecycleEvent::EnvironmentDeleted { id } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::EnvironmentUpdated { .. } => "environment-updated",
            LifecycleEvent::EnvironmentDeleted { .. } => "environment-deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Deliver to current subscribers. Having none is not an error.
    pub fn publish(&self, event: LifecycleEvent) {
        let name = event.name();
        let id = event.environment_id();
        match self.sender.send(event) {
            Ok(receivers) => {
                log_debug!("Published {} for {} to {} subscribers", name, id, receivers)
            }
            Err(_) => log_debug!("Dropped {} for {}: no subscribers", name, id),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let env = Environment::new("demo".into(), "lamp".into(), PathBuf::from("/tmp/demo"));
        bus.publish(LifecycleEvent::EnvironmentUpdated {
            environment: env.clone(),
        });
        bus.publish(LifecycleEvent::EnvironmentDeleted { id: env.id });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "environment-updated");
        assert_eq!(first.environment_id(), env.id);
        let second = rx.recv().await.unwrap();
        assert_eq!(second, LifecycleEvent::EnvironmentDeleted { id: env.id });
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::EnvironmentDeleted { id: Uuid::new_v4() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_their_channel_name() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(LifecycleEvent::EnvironmentDeleted { id }).unwrap();
        assert_eq!(value["event"], "environment-deleted");
        assert_eq!(value["id"], id.to_string());
    }
}
