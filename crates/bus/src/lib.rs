//! Bus Adapter (C2, §4.2): the transport used to forward requests and
//! events between relay processes, keyed by the slot-pooled topic names
//! produced by the Slot Registry (`{prefix}-{slot_name}`).
//!
//! Delivery is at-least-once with explicit ack (§4.2): a subscriber gets
//! each frame wrapped in a [`BusDelivery`] and must [`ack`](BusDelivery::ack)
//! it once handled, or [`nack`](BusDelivery::nack) (or just drop it) to
//! leave it for redelivery. [`RedisBusAdapter`] is the production backend,
//! implemented on a Redis Stream consumer group per topic: `ensure_topic`
//! idempotently creates the group (`BUSYGROUP` on a repeat call is success,
//! not an error), an unacked entry is reclaimed once it's sat in the
//! pending-entries list longer than `BUS_ACK_DEADLINE_SECS`, and each
//! publish trims the stream down to `BUS_RETENTION_SECS` of history.
//! [`LocalBusAdapter`] is an in-memory stand-in with the same topic/ack
//! shape, for exercising cross-instance routing logic in tests without real
//! Redis — ack/nack are no-ops there, since a single process has nothing to
//! redeliver to. [`NullBusAdapter`] is what gets wired up when no bus URL is
//! configured at all — local-only mode, where cross-instance routing is
//! unreachable by definition.

pub mod error;
mod local;
mod null;
mod redis_adapter;

pub use error::{Error, Result};
pub use local::LocalBusAdapter;
pub use null::NullBusAdapter;
pub use redis_adapter::RedisBusAdapter;

use async_trait::async_trait;
use homecast_protocol::bus::BusFrame;
use tokio::sync::mpsc;

/// One delivered frame plus the ack sink a subscriber must resolve once
/// it's done with it (§4.2 "ack before returning, nack on decode error").
/// Dropping this without calling either leaves it unacked, same as [`nack`](Self::nack).
pub struct BusDelivery {
    pub frame: BusFrame,
    ack: Box<dyn FnOnce(bool) + Send>,
}

impl BusDelivery {
    pub fn new(frame: BusFrame, ack: impl FnOnce(bool) + Send + 'static) -> Self {
        Self { frame, ack: Box::new(ack) }
    }

    /// Mark this delivery handled; the transport is free to drop its retained copy.
    pub fn ack(self) {
        (self.ack)(true);
    }

    /// Leave this delivery unacked so the transport redelivers it after the ack deadline.
    pub fn nack(self) {
        (self.ack)(false);
    }
}

/// A live subscription to a bus topic. Frames arrive in publish order;
/// dropping this drops the subscription.
pub struct BusSubscription {
    rx: mpsc::Receiver<BusDelivery>,
}

impl BusSubscription {
    pub fn new(rx: mpsc::Receiver<BusDelivery>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<BusDelivery> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Publish `frame` to `topic` with at-least-once delivery (§4.2): the
    /// transport retains it until every subscriber's consumer group acks it
    /// or the retention window (`BUS_RETENTION_SECS`) elapses.
    async fn publish(&self, topic: &str, frame: &BusFrame) -> Result<()>;

    /// Idempotently provision `topic` so it's ready to take subscribers —
    /// "already exists" is success, not an error (§4.2). `subscribe` calls
    /// this itself; exposed separately so a caller can provision a topic
    /// ahead of the first subscriber if it wants to.
    async fn ensure_topic(&self, topic: &str) -> Result<()>;

    /// Subscribe to `topic`, first calling [`ensure_topic`](Self::ensure_topic).
    /// Each [`BusDelivery`] must be acked or nacked by the caller; an
    /// unacked delivery is redelivered after `BUS_ACK_DEADLINE_SECS` of
    /// inactivity.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription>;

    /// `true` when this adapter can actually reach other processes.
    fn enabled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use homecast_protocol::bus::BusFrame;

    #[tokio::test]
    async fn local_adapter_roundtrips_a_frame() {
        let bus = LocalBusAdapter::new();
        let mut sub = bus.subscribe("homecast-instance-a1b2").await.unwrap();
        let frame = BusFrame::ListenersChanged(homecast_protocol::bus::BusListenersChanged {
            user_id: "u1".into(),
            active: true,
        });
        bus.publish("homecast-instance-a1b2", &frame).await.unwrap();
        let delivery = sub.recv().await.unwrap();
        match &delivery.frame {
            BusFrame::ListenersChanged(e) => {
                assert_eq!(e.user_id, "u1");
                assert!(e.active);
            }
            _ => panic!("wrong variant"),
        }
        delivery.ack();
    }

    #[tokio::test]
    async fn local_adapter_reports_enabled() {
        let bus = LocalBusAdapter::new();
        assert!(bus.enabled());
    }

    #[tokio::test]
    async fn null_adapter_refuses_to_publish() {
        let bus = NullBusAdapter;
        assert!(!bus.enabled());
        let frame = BusFrame::ListenersChanged(homecast_protocol::bus::BusListenersChanged {
            user_id: "u1".into(),
            active: false,
        });
        assert!(matches!(bus.publish("topic", &frame).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn null_adapter_refuses_to_ensure_topic() {
        let bus = NullBusAdapter;
        assert!(matches!(bus.ensure_topic("topic").await, Err(Error::NotConnected)));
    }
}
