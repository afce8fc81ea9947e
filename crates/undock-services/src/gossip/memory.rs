//! In-process gossip bus. All handles cloned from one bus share topics.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{Gossip, GossipError, GossipMessage, TOPIC_CAPACITY};

#[derive(Clone, Default)]
pub struct MemoryGossipBus {
    topics: Arc<DashMap<String, broadcast::Sender<GossipMessage>>>,
}

impl MemoryGossipBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<GossipMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Gossip for MemoryGossipBus {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), GossipError> {
        // No subscribers is not an error; the message just goes nowhere.
        let _ = self.sender(topic).send(GossipMessage { source: None, data });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<GossipMessage>, GossipError> {
        Ok(self.sender(topic).subscribe())
    }
}
