use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use homecast_protocol::bus::BusFrame;
use tokio::sync::{broadcast, mpsc};

use crate::{BusAdapter, BusDelivery, BusSubscription, Result};

const CHANNEL_CAPACITY: usize = 256;

/// In-memory bus with the same per-topic fan-out shape as the Redis
/// backend, minus the network. Every subscriber of a topic receives every
/// frame published to it, in order.
pub struct LocalBusAdapter {
    topics: Mutex<HashMap<String, broadcast::Sender<BusFrame>>>,
}

impl LocalBusAdapter {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusFrame> {
        let mut topics = self.topics.lock().expect("bus topic map poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for LocalBusAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusAdapter for LocalBusAdapter {
    async fn publish(&self, topic: &str, frame: &BusFrame) -> Result<()> {
        // No subscriber yet is not an error — the subscriber that arrives
        // later provisions its own broadcast receiver, it just won't see
        // anything published before it existed.
        let _ = self.sender_for(topic).send(frame.clone());
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        // The broadcast channel is created lazily in `sender_for`, which
        // already makes this idempotent; nothing else to provision in-memory.
        let _ = self.sender_for(topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        self.ensure_topic(topic).await?;
        let mut broadcast_rx = self.sender_for(topic).subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Ok(frame) = broadcast_rx.recv().await {
                // No consumer group to track in a single process: ack/nack
                // are no-ops here, there's nothing to redeliver to.
                let delivery = BusDelivery::new(frame, |_acked| {});
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });
        Ok(BusSubscription::new(rx))
    }

    fn enabled(&self) -> bool {
        true
    }
}
