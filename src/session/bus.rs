//! Internal message bus
//!
//! One `tokio::sync::broadcast` channel per FIX MsgType topic. The session
//! publishes every validated inbound message here; the market-data gateway
//! and ad hoc correlation listeners subscribe to the topics they need.
//! Channels are created lazily on first publish or subscribe.
//!
//! Every message is also published on [`ALL_TOPICS`], which preserves wire
//! order across message types for consumers that need it.

use crate::fix::FixMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared decoded message
pub type BusMessage = Arc<FixMessage>;

/// Topic carrying every published message in arrival order
pub const ALL_TOPICS: &str = "*";

/// Topic-keyed broadcast bus
pub struct MessageBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl MessageBus {
    /// Create bus; `capacity` is the per-topic backlog before receivers lag
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a topic, creating its channel if needed
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.subscribe();
        }
        self.sender(topic).subscribe()
    }

    /// Publish a message on its MsgType topic
    ///
    /// Returns the number of MsgType-topic receivers that got it. Messages
    /// without a MsgType or without any listener are dropped.
    pub fn publish(&self, msg: BusMessage) -> usize {
        let topic = match msg.msg_type() {
            Some(t) => t.to_string(),
            None => return 0,
        };
        self.publish_on(ALL_TOPICS, Arc::clone(&msg));
        self.publish_on(&topic, msg)
    }

    /// Publish on an explicit topic
    pub fn publish_on(&self, topic: &str, msg: BusMessage) -> usize {
        let tx = match self.topics.read().get(topic) {
            Some(tx) => tx.clone(),
            None => return 0,
        };
        tx.send(msg).unwrap_or(0)
    }

    /// Number of live receivers on a topic
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(65_536)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::tags;

    fn msg(msg_type: &str, secid: &str) -> BusMessage {
        let mut m = FixMessage::new();
        m.append(tags::MSG_TYPE, msg_type).append(tags::SECURITY_ID, secid);
        Arc::new(m)
    }

    #[tokio::test]
    async fn test_topic_routing() {
        let bus = MessageBus::new(16);
        let mut snapshots = bus.subscribe("W");
        let mut increments = bus.subscribe("X");

        assert_eq!(bus.publish(msg("W", "1")), 1);
        assert_eq!(bus.publish(msg("X", "2")), 1);

        assert_eq!(snapshots.recv().await.unwrap().get_str(tags::SECURITY_ID), Some("1"));
        assert_eq!(increments.recv().await.unwrap().get_str(tags::SECURITY_ID), Some("2"));
        assert!(snapshots.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_listener_is_dropped() {
        let bus = MessageBus::new(16);
        assert_eq!(bus.publish(msg("d", "1")), 0);
        assert_eq!(bus.publish(Arc::new(FixMessage::new())), 0);
    }

    #[tokio::test]
    async fn test_all_topics_keeps_arrival_order() {
        let bus = MessageBus::new(16);
        let mut all = bus.subscribe(ALL_TOPICS);

        bus.publish(msg("X", "1"));
        bus.publish(msg("W", "2"));
        bus.publish(msg("X", "3"));

        for expected in ["1", "2", "3"] {
            assert_eq!(all.recv().await.unwrap().get_str(tags::SECURITY_ID), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_each_subscriber_sees_every_message() {
        let bus = MessageBus::new(16);
        let mut a = bus.subscribe("d");
        let mut b = bus.subscribe("d");
        assert_eq!(bus.receiver_count("d"), 2);

        bus.publish(msg("d", "9"));
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
