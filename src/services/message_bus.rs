//! In-process publish/subscribe bus for agent signalling.
//!
//! Delivery is synchronous: `publish` invokes every matching handler before
//! it returns, first global subscribers, then the message's task channel,
//! then its type channel, each in subscription order. Nothing is buffered;
//! a message published while nobody listens is gone.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::domain::models::{BusMessage, MessageType};

/// Message handler. Runs on the publisher's task and must not block.
pub type MessageHandler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Subscription granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Global,
    Task(String),
    Type(MessageType),
}

impl Channel {
    pub fn key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Task(id) => format!("task:{id}"),
            Self::Type(t) => format!("type:{t}"),
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    channels: HashMap<Channel, Vec<(u64, MessageHandler)>>,
}

struct BusInner {
    registry: Mutex<Registry>,
    sequence: AtomicU64,
}

impl BusInner {
    fn remove(&self, channel: &Channel, id: u64) -> bool {
        let mut registry = self.registry.lock();
        let Some(handlers) = registry.channels.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.channels.remove(channel);
        }
        removed
    }
}

/// Handle returned by the subscribe calls. Dropping it keeps the handler
/// registered; call [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    bus: Weak<BusInner>,
    channel: Channel,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Remove the handler. Returns `false` if it was already removed or the
    /// bus is gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove(&self.channel, self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

/// Typed pub/sub bus. Cheap to clone; clones share subscribers.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Publish a message, assigning its sequence number. Returns the message
    /// as delivered.
    pub fn publish(&self, mut message: BusMessage) -> BusMessage {
        message.sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);

        // Snapshot so handlers may publish or (un)subscribe re-entrantly.
        let handlers: Vec<MessageHandler> = {
            let registry = self.inner.registry.lock();
            [
                Channel::Global,
                Channel::Task(message.task_id.clone()),
                Channel::Type(message.message_type()),
            ]
            .iter()
            .filter_map(|c| registry.channels.get(c))
            .flat_map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)))
            .collect()
        };

        trace!(
            sequence = message.sequence,
            message_type = %message.message_type(),
            task_id = %message.task_id,
            from = %message.from,
            to = %message.to,
            handlers = handlers.len(),
            "Publishing bus message"
        );

        for handler in &handlers {
            handler(&message);
        }
        message
    }

    fn add(&self, channel: Channel, handler: MessageHandler) -> Subscription {
        let mut registry = self.inner.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .channels
            .entry(channel.clone())
            .or_default()
            .push((id, handler));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            channel,
            id,
        }
    }

    /// Receive every message.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        self.add(Channel::Global, Arc::new(handler))
    }

    /// Receive messages for one task.
    pub fn subscribe_to_task<F>(&self, task_id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        self.add(Channel::Task(task_id.into()), Arc::new(handler))
    }

    /// Receive messages of one type.
    pub fn subscribe_to_type<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        self.add(Channel::Type(message_type), Arc::new(handler))
    }

    /// Number of handlers on a channel.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner
            .registry
            .lock()
            .channels
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Sequence number the next message will receive.
    pub fn current_sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Endpoint, MessagePayload};

    fn msg(task_id: &str, payload: MessagePayload) -> BusMessage {
        BusMessage::new(Endpoint::dev(task_id), Endpoint::harness(), task_id, payload)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> MessageHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |label: &str| -> MessageHandler {
            let log = log2.clone();
            let label = label.to_string();
            Arc::new(move |m: &BusMessage| log.lock().push(format!("{label}:{}", m.task_id)))
        };
        (log, make)
    }

    #[test]
    fn test_task_channel_filters_by_task() {
        let bus = MessageBus::new();
        let (log, make) = recorder();
        let h = make("t1");
        bus.subscribe_to_task("t1", move |m| h(m));

        bus.publish(msg("t1", MessagePayload::TaskWorking));
        bus.publish(msg("t2", MessagePayload::TaskWorking));

        assert_eq!(*log.lock(), vec!["t1:t1".to_string()]);
    }

    #[test]
    fn test_fan_out_order_global_task_type() {
        let bus = MessageBus::new();
        let (log, make) = recorder();
        let (ty, task, global_a, global_b) = (make("type"), make("task"), make("global-a"), make("global-b"));
        bus.subscribe_to_type(MessageType::TaskCompleted, move |m| ty(m));
        bus.subscribe_to_task("t1", move |m| task(m));
        bus.subscribe(move |m| global_a(m));
        bus.subscribe(move |m| global_b(m));

        bus.publish(msg("t1", MessagePayload::TaskCompleted { feature_id: "f1".into() }));
        assert_eq!(
            *log.lock(),
            vec!["global-a:t1", "global-b:t1", "task:t1", "type:t1"]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let (log, make) = recorder();
        let h = make("g");
        let sub = bus.subscribe(move |m| h(m));
        assert_eq!(bus.subscriber_count(&Channel::Global), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        bus.publish(msg("t1", MessagePayload::TaskWorking));
        assert!(log.lock().is_empty());
        assert_eq!(bus.subscriber_count(&Channel::Global), 0);
    }

    #[test]
    fn test_sequence_numbers_monotonic() {
        let bus = MessageBus::new();
        let a = bus.publish(msg("t1", MessagePayload::TaskWorking));
        let b = bus.publish(msg("t1", MessagePayload::TaskCompleted { feature_id: "f1".into() }));
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = MessageBus::new();
        let (log, make) = recorder();
        let inner_bus = bus.clone();
        bus.subscribe_to_type(MessageType::TaskCompleted, move |m| {
            inner_bus.publish(msg(&format!("{}-next", m.task_id), MessagePayload::TaskWorking));
        });
        let h = make("working");
        bus.subscribe_to_type(MessageType::TaskWorking, move |m| h(m));

        bus.publish(msg("t1", MessagePayload::TaskCompleted { feature_id: "f1".into() }));
        assert_eq!(*log.lock(), vec!["working:t1-next".to_string()]);
    }

    #[test]
    fn test_channel_keys() {
        assert_eq!(Channel::Task("t1".into()).key(), "task:t1");
        assert_eq!(Channel::Type(MessageType::TaskFailed).key(), "type:task_failed");
    }
}
