//! Readiness cascade driven by completion messages.
//!
//! Dependents are only promoted after a `task_completed` message has been
//! published, never speculatively.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::models::{MessagePayload, MessageType};
use crate::services::message_bus::{MessageBus, Subscription};
use crate::services::task_dag::TaskDagStore;

/// Tasks promoted to `ready` by one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeEvent {
    pub feature_id: String,
    pub completed_task_id: String,
    pub promoted: Vec<String>,
}

/// Subscribes to `task_completed` and promotes unblocked dependents.
pub struct DependencyCascade {
    subscription: Subscription,
    events: broadcast::Sender<CascadeEvent>,
}

impl DependencyCascade {
    pub fn attach(bus: &MessageBus, dag: Arc<TaskDagStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        let sender = events.clone();

        let subscription = bus.subscribe_to_type(MessageType::TaskCompleted, move |message| {
            let MessagePayload::TaskCompleted { feature_id } = &message.payload else {
                return;
            };
            match dag.promote_ready_dependents(feature_id, &message.task_id) {
                Ok(promoted) => {
                    debug!(%feature_id, task_id = %message.task_id, ?promoted, "Completion cascaded");
                    let _ = sender.send(CascadeEvent {
                        feature_id: feature_id.clone(),
                        completed_task_id: message.task_id.clone(),
                        promoted,
                    });
                }
                Err(e) => {
                    warn!(%feature_id, task_id = %message.task_id, error = %e, "Failed to cascade completion");
                }
            }
        });

        Self { subscription, events }
    }

    /// Observe promotions, e.g. to spawn the next dev agents.
    pub fn subscribe(&self) -> broadcast::Receiver<CascadeEvent> {
        self.events.subscribe()
    }

    pub fn detach(&self) -> bool {
        self.subscription.unsubscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BusMessage, Endpoint, FeatureSpec, Task, TaskStatus};

    #[tokio::test]
    async fn test_completion_promotes_dependents() {
        let bus = MessageBus::new();
        let dag = Arc::new(TaskDagStore::new());
        dag.create_feature("f1", "Feature", FeatureSpec::default()).unwrap();
        dag.add_task("f1", Task::new("a", "A", "a").with_status(TaskStatus::ReadyForMerge))
            .unwrap();
        dag.add_task("f1", Task::new("b", "B", "b")).unwrap();
        dag.add_connection("f1", "a", "b").unwrap();

        let cascade = DependencyCascade::attach(&bus, dag.clone());
        let mut rx = cascade.subscribe();

        // Completing without a message does not promote anything yet.
        dag.update_task_status("f1", "a", TaskStatus::Completed).unwrap();
        assert_eq!(dag.get_task("f1", "b").unwrap().status, TaskStatus::Blocked);

        bus.publish(BusMessage::new(
            Endpoint::orchestrator(),
            Endpoint::harness(),
            "a",
            MessagePayload::TaskCompleted {
                feature_id: "f1".into(),
            },
        ));

        assert_eq!(dag.get_task("f1", "b").unwrap().status, TaskStatus::Ready);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.promoted, vec!["b".to_string()]);

        assert!(cascade.detach());
    }
}
