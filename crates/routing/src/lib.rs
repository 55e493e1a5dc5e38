//! Cross-Instance Router (C4, §4.4): forwards a request to whichever
//! process owns the target agent, whether that's this process or another
//! one reachable only over the bus.
//!
//! Binding cascade for a `Route` call:
//! 1. Resolve the agent's owning instance via the Session Registry.
//! 2. If it's this instance, dispatch locally through [`LocalDispatch`].
//! 3. Otherwise resolve that instance's slot, publish a `request` bus
//!    frame to it, and await the matching `response` frame by correlation id.

pub mod error;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use homecast_bus::BusAdapter;
use homecast_protocol::bus::{topic_for_slot, BusEvent, BusFrame, BusRequest, BusResponse};
use homecast_protocol::BUS_PUBLISH_DEADLINE_MS;
use homecast_sessions::SessionRegistry;
use homecast_slots::SlotRegistry;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

pub use error::{Error, Result};

/// What actually dispatches a request to an agent connected to this process.
/// Implemented by the Connection Manager (C3); kept as a trait here so the
/// router doesn't need to depend on the gateway crate that owns sockets.
#[async_trait]
pub trait LocalDispatch: Send + Sync {
    async fn send_local(&self, agent_id: &str, action: &str, payload: Value) -> Result<Value>;
}

struct PendingCorrelations {
    inner: Mutex<HashMap<String, oneshot::Sender<BusResponse>>>,
}

impl PendingCorrelations {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, correlation_id: String, tx: oneshot::Sender<BusResponse>) {
        self.inner.lock().expect("pending map poisoned").insert(correlation_id, tx);
    }

    fn remove(&self, correlation_id: &str) -> Option<oneshot::Sender<BusResponse>> {
        self.inner.lock().expect("pending map poisoned").remove(correlation_id)
    }
}

pub struct Router {
    instance_id: String,
    own_slot: String,
    topic_prefix: String,
    /// Skip the local short-circuit even when this instance owns the agent,
    /// forcing every request over the bus (§6.4 `HOMECAST_FORCE_BUS`) — a
    /// test escape hatch for exercising cross-instance routing on one process.
    force_bus: bool,
    sessions: std::sync::Arc<dyn SessionRegistry>,
    slots: std::sync::Arc<dyn SlotRegistry>,
    bus: std::sync::Arc<dyn BusAdapter>,
    local: std::sync::Arc<dyn LocalDispatch>,
    pending: PendingCorrelations,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance_id: String,
        own_slot: String,
        topic_prefix: String,
        force_bus: bool,
        sessions: std::sync::Arc<dyn SessionRegistry>,
        slots: std::sync::Arc<dyn SlotRegistry>,
        bus: std::sync::Arc<dyn BusAdapter>,
        local: std::sync::Arc<dyn LocalDispatch>,
    ) -> Self {
        Self {
            instance_id,
            own_slot,
            topic_prefix,
            force_bus,
            sessions,
            slots,
            bus,
            local,
            pending: PendingCorrelations::new(),
        }
    }

    /// Route a request to `agent_id`, local or remote, returning its reply
    /// payload or a routing-tier error.
    pub async fn route(&self, agent_id: &str, action: &str, payload: Value, deadline: Duration) -> Result<Value> {
        let owning_instance = self
            .sessions
            .agent_location(agent_id)
            .await
            .map_err(|_| Error::AgentUnreachable)?
            .ok_or(Error::AgentUnreachable)?;

        if !self.force_bus && owning_instance == self.instance_id {
            return self.local.send_local(agent_id, action, payload).await;
        }

        let target_slot = self
            .slots
            .slot_for_instance(&owning_instance)
            .await
            .map_err(|_| Error::AgentUnreachable)?
            .ok_or(Error::AgentUnreachable)?;

        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let request = BusFrame::Request(BusRequest {
            correlation_id: correlation_id.clone(),
            source_slot: self.own_slot.clone(),
            agent_id: agent_id.to_string(),
            action: action.to_string(),
            payload,
        });

        let target_topic = topic_for_slot(&self.topic_prefix, &target_slot.slot_name);
        tracing::info!(
            correlation_id = %correlation_id,
            from = %self.own_slot,
            to = %target_slot.slot_name,
            %agent_id,
            %action,
            "routing request to remote instance"
        );

        if let Err(err) = self.publish_with_deadline(&target_topic, &request).await {
            self.pending.remove(&correlation_id);
            return Err(Error::BusPublishFailed(err));
        }

        let result = tokio::time::timeout(deadline, rx).await;
        match result {
            Ok(Ok(response)) => Self::payload_from_response(response),
            Ok(Err(_)) => {
                // Sender dropped without a response; treat like a timeout.
                Err(Error::Timeout)
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(Error::Timeout)
            }
        }
    }

    /// Publish with `BUS_PUBLISH_DEADLINE_MS` enforced (§5): a stalled bus
    /// connection can't hang a caller past its own deadline just because the
    /// transport itself never returns.
    async fn publish_with_deadline(&self, topic: &str, frame: &BusFrame) -> std::result::Result<(), homecast_bus::Error> {
        match tokio::time::timeout(Duration::from_millis(BUS_PUBLISH_DEADLINE_MS), self.bus.publish(topic, frame)).await {
            Ok(result) => result,
            Err(_) => Err(homecast_bus::Error::Timeout { topic: topic.to_string() }),
        }
    }

    fn payload_from_response(response: BusResponse) -> Result<Value> {
        if let Some(error) = response.error {
            return Err(Error::Forwarded {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.payload.unwrap_or(Value::Null))
    }

    /// Handle an inbound frame received on this process's own slot
    /// subscription.
    pub async fn handle_bus_frame(&self, frame: BusFrame) {
        match frame {
            BusFrame::Request(req) => self.handle_remote_request(req).await,
            BusFrame::Response(resp) => self.handle_remote_response(resp),
            // Events and listener-transition frames are consumed by the Web
            // Client Hub / Event Pipe, not the router.
            BusFrame::Event(_) | BusFrame::ListenersChanged(_) => {}
        }
    }

    async fn handle_remote_request(&self, req: BusRequest) {
        let response = match self.local.send_local(&req.agent_id, &req.action, req.payload).await {
            Ok(payload) => BusResponse::ok(req.correlation_id.clone(), payload),
            Err(err) => BusResponse::err(req.correlation_id.clone(), err.code(), err.to_string()),
        };

        let source_topic = topic_for_slot(&self.topic_prefix, &req.source_slot);
        let frame = BusFrame::Response(response);
        if let Err(err) = self.publish_with_deadline(&source_topic, &frame).await {
            tracing::warn!(
                correlation_id = %req.correlation_id,
                source_slot = %req.source_slot,
                %err,
                "failed to publish response back to source slot"
            );
        }
    }

    fn handle_remote_response(&self, resp: BusResponse) {
        if let Some(tx) = self.pending.remove(&resp.correlation_id) {
            // A failure here only means the waiter already gave up (timed
            // out) and dropped its receiver; the response is just discarded.
            let _ = tx.send(resp);
        } else {
            tracing::debug!(correlation_id = %resp.correlation_id, "late or unknown response, discarding");
        }
    }

    /// Publish an agent-originated event to every other live instance so
    /// their Web Client Hubs can fan it out locally (§4.7 Event Pipe). Like
    /// the listener-transition notice, an event has no single target slot —
    /// it has to reach every process that might have a listener for this
    /// user, not just the one topic this process itself subscribes to.
    pub async fn publish_event(&self, event: BusEvent) -> std::result::Result<(), homecast_bus::Error> {
        let slots = self.slots.active_slots().await.map_err(|_| homecast_bus::Error::NotConnected)?;
        let frame = BusFrame::Event(event);
        for slot in slots {
            if slot.slot_name == self.own_slot {
                continue;
            }
            let topic = topic_for_slot(&self.topic_prefix, &slot.slot_name);
            if let Err(err) = self.publish_with_deadline(&topic, &frame).await {
                tracing::warn!(slot = %slot.slot_name, %err, "failed to publish event to remote instance");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homecast_bus::LocalBusAdapter;
    use std::sync::Arc;

    struct AlwaysOkDispatch;

    #[async_trait]
    impl LocalDispatch for AlwaysOkDispatch {
        async fn send_local(&self, _agent_id: &str, _action: &str, payload: Value) -> Result<Value> {
            Ok(payload)
        }
    }

    struct StubSessions {
        owner: Option<String>,
    }

    #[async_trait]
    impl SessionRegistry for StubSessions {
        async fn upsert_agent(
            &self,
            _user_id: uuid::Uuid,
            _instance_id: &str,
            _agent_id: &str,
            _name: Option<&str>,
        ) -> anyhow::Result<homecast_sessions::Session> {
            unimplemented!()
        }
        async fn upsert_listener(
            &self,
            _user_id: uuid::Uuid,
            _instance_id: &str,
            _name: Option<&str>,
        ) -> anyhow::Result<uuid::Uuid> {
            unimplemented!()
        }
        async fn heartbeat(&self, _session_id: uuid::Uuid) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn heartbeat_by_agent(&self, _agent_id: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete(&self, _session_id: uuid::Uuid) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete_by_agent(&self, _agent_id: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete_by_instance(&self, _instance_id: &str) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn user_has_active_listeners(&self, _user_id: uuid::Uuid) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn agent_location(&self, _agent_id: &str) -> anyhow::Result<Option<String>> {
            Ok(self.owner.clone())
        }
        async fn agent_for_user(&self, _user_id: uuid::Uuid) -> anyhow::Result<Option<String>> {
            unimplemented!()
        }
        async fn agents_for_user(&self, _user_id: uuid::Uuid) -> anyhow::Result<Vec<String>> {
            unimplemented!()
        }
        async fn garbage_collect_stale(&self) -> anyhow::Result<u64> {
            unimplemented!()
        }
    }

    struct StubSlots;

    #[async_trait]
    impl SlotRegistry for StubSlots {
        async fn claim(&self, _instance_id: &str) -> anyhow::Result<homecast_slots::Slot> {
            unimplemented!()
        }
        async fn heartbeat(&self, _instance_id: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn release(&self, _instance_id: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn slot_for_instance(&self, instance_id: &str) -> anyhow::Result<Option<homecast_slots::Slot>> {
            Ok(Some(homecast_slots::Slot {
                slot_name: format!("slot-for-{instance_id}"),
                instance_id: Some(instance_id.to_string()),
                claimed_at: None,
                last_heartbeat: None,
            }))
        }
        async fn active_slots(&self) -> anyhow::Result<Vec<homecast_slots::Slot>> {
            unimplemented!()
        }
    }

    fn test_router(owner: Option<String>) -> Router {
        test_router_with_force_bus(owner, false)
    }

    fn test_router_with_force_bus(owner: Option<String>, force_bus: bool) -> Router {
        Router::new(
            "self-instance".into(),
            "ab12".into(),
            "homecast-instance".into(),
            force_bus,
            Arc::new(StubSessions { owner }),
            Arc::new(StubSlots),
            Arc::new(LocalBusAdapter::new()),
            Arc::new(AlwaysOkDispatch),
        )
    }

    #[tokio::test]
    async fn routes_locally_when_instance_matches() {
        let router = test_router(Some("self-instance".into()));
        let result = router
            .route("agent-1", "ping", serde_json::json!({"x": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn force_bus_skips_local_short_circuit_even_when_instance_matches() {
        let router = test_router_with_force_bus(Some("self-instance".into()), true);
        // Nothing ever subscribes to consume the published request and reply,
        // so this only returns once the routing deadline elapses — if the
        // local short-circuit had fired instead, this would resolve
        // immediately with the echoed payload.
        let err = router
            .route("agent-1", "ping", serde_json::json!({"x": 1}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code(), homecast_protocol::error_codes::routing::TIMEOUT);
    }

    #[tokio::test]
    async fn unreachable_agent_reports_agent_unreachable() {
        let router = test_router(None);
        let err = router
            .route("agent-1", "ping", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), homecast_protocol::error_codes::routing::AGENT_UNREACHABLE);
    }

    #[tokio::test]
    async fn late_response_for_unknown_correlation_is_discarded() {
        let router = test_router(None);
        // Should not panic even though nothing is pending for this id.
        router.handle_remote_response(BusResponse::ok("unknown-id", serde_json::json!(null)));
    }
}
