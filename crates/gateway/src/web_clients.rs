//! Web Client Hub (C6, §4.6) and Event Pipe (C7, §4.7).
//!
//! The hub owns every listener socket accepted by this process and is the
//! only thing that decides whether a connect/disconnect is a 0↔1 listener
//! transition for a user — that decision has to straddle the insert/delete
//! so the "before" read can't race with a concurrent connect from the same
//! user on another socket.

use std::collections::HashMap;
use std::sync::Arc;

use homecast_protocol::listener::ListenerFrame;
use homecast_sessions::SessionRegistry;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::connection::ConnectionManager;

struct WebClient {
    user_id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

/// Owns every listener (web UI) socket accepted by this process.
pub struct WebClientHub {
    instance_id: String,
    clients: RwLock<HashMap<Uuid, WebClient>>,
    sessions: Arc<dyn SessionRegistry>,
    connections: Arc<ConnectionManager>,
}

impl WebClientHub {
    pub fn new(instance_id: String, sessions: Arc<dyn SessionRegistry>, connections: Arc<ConnectionManager>) -> Self {
        Self { instance_id, clients: RwLock::new(HashMap::new()), sessions, connections }
    }

    /// §4.6 steps 1-3: returns the new session id and whether this connect
    /// was the transition from zero to one active listeners for `user_id`.
    pub async fn connect(&self, user_id: Uuid, name: Option<&str>, sender: mpsc::UnboundedSender<String>) -> anyhow::Result<(Uuid, bool)> {
        let had_listeners = self.sessions.user_has_active_listeners(user_id).await?;
        let session_id = self.sessions.upsert_listener(user_id, &self.instance_id, name).await?;
        self.clients.write().await.insert(session_id, WebClient { user_id, sender });
        Ok((session_id, !had_listeners))
    }

    /// Symmetric disconnect: returns whether this was the 1→0 transition.
    pub async fn disconnect(&self, session_id: Uuid) -> anyhow::Result<Option<(Uuid, bool)>> {
        let Some(client) = self.clients.write().await.remove(&session_id) else {
            return Ok(None);
        };
        self.sessions.delete(session_id).await?;
        let still_active = self.sessions.user_has_active_listeners(client.user_id).await?;
        Ok(Some((client.user_id, !still_active)))
    }

    pub async fn heartbeat(&self, session_id: Uuid) -> anyhow::Result<bool> {
        self.sessions.heartbeat(session_id).await
    }

    /// Write a raw frame directly to one listener's socket (used for the
    /// `pong` reply, which targets only the session that sent `ping`).
    pub async fn send_direct(&self, session_id: Uuid, text: String) {
        if let Some(client) = self.clients.read().await.get(&session_id) {
            let _ = client.sender.send(text);
        }
    }

    /// Fan a frame out to every local listener owned by `user_id`. Sockets
    /// whose channel is already closed are dropped silently — the read loop
    /// on that side will observe the disconnect and clean up its session row.
    pub async fn broadcast_to_user(&self, user_id: Uuid, frame: &ListenerFrame) {
        let json = serde_json::to_string(frame).expect("ListenerFrame always serializes");
        let clients = self.clients.read().await;
        for client in clients.values().filter(|c| c.user_id == user_id) {
            let _ = client.sender.send(json.clone());
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send `{type:"config", action:"listeners_changed"}` to every local
    /// agent owned by `user_id` and return whether any local agents exist,
    /// so the caller knows whether a remote fan-out via the bus is needed
    /// too (§4.6 step 3 / disconnect symmetric step).
    pub async fn notify_local_agents(&self, user_id: Uuid, active: bool) {
        self.connections.notify_listeners_changed(user_id, active).await;
    }
}

/// Carries agent-originated `event` frames to local listeners and to other
/// processes' hubs via the bus (§4.7).
pub struct EventPipe {
    hub: Arc<WebClientHub>,
    router: Arc<homecast_routing::Router>,
}

impl EventPipe {
    pub fn new(hub: Arc<WebClientHub>, router: Arc<homecast_routing::Router>) -> Self {
        Self { hub, router }
    }

    /// An `event` frame arrived from an agent connected to this process.
    /// `user_id` is read from the Connection Manager's local map for that
    /// agent, never the database — the agent is always local when this is
    /// called.
    pub async fn handle_agent_event(&self, user_id: Uuid, accessory_id: String, characteristic_type: String, value: serde_json::Value) {
        let frame = ListenerFrame::characteristic_update(accessory_id.clone(), characteristic_type.clone(), value.clone());
        self.hub.broadcast_to_user(user_id, &frame).await;

        let event = homecast_protocol::bus::BusEvent {
            user_id: user_id.to_string(),
            accessory_id,
            characteristic_type,
            value,
        };
        if let Err(err) = self.router.publish_event(event).await {
            tracing::warn!(%user_id, %err, "failed to publish event to bus, other instances' listeners will miss it");
        }
    }

    /// An `event` frame arrived over the bus from another process's agent;
    /// fan it only to local listeners (do not republish, or every process
    /// would re-broadcast forever).
    pub async fn handle_remote_event(&self, event: homecast_protocol::bus::BusEvent) {
        let Ok(user_id) = event.user_id.parse::<Uuid>() else {
            tracing::warn!(user_id = %event.user_id, "bus event carried a non-uuid user id, dropping");
            return;
        };
        let frame = ListenerFrame::characteristic_update(event.accessory_id, event.characteristic_type, event.value);
        self.hub.broadcast_to_user(user_id, &frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homecast_sessions::Session;

    struct StubSessions {
        active_before: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionRegistry for StubSessions {
        async fn upsert_agent(&self, _u: Uuid, _i: &str, _a: &str, _n: Option<&str>) -> anyhow::Result<Session> {
            unimplemented!()
        }
        async fn upsert_listener(&self, _u: Uuid, _i: &str, _n: Option<&str>) -> anyhow::Result<Uuid> {
            Ok(Uuid::new_v4())
        }
        async fn heartbeat(&self, _s: Uuid) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn heartbeat_by_agent(&self, _a: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete(&self, _s: Uuid) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn delete_by_agent(&self, _a: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete_by_instance(&self, _i: &str) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn user_has_active_listeners(&self, _u: Uuid) -> anyhow::Result<bool> {
            Ok(self.active_before.load(std::sync::atomic::Ordering::SeqCst))
        }
        async fn agent_location(&self, _a: &str) -> anyhow::Result<Option<String>> {
            unimplemented!()
        }
        async fn agent_for_user(&self, _u: Uuid) -> anyhow::Result<Option<String>> {
            unimplemented!()
        }
        async fn agents_for_user(&self, _u: Uuid) -> anyhow::Result<Vec<String>> {
            unimplemented!()
        }
        async fn garbage_collect_stale(&self) -> anyhow::Result<u64> {
            unimplemented!()
        }
    }

    fn hub(active_before: bool) -> WebClientHub {
        let sessions = Arc::new(StubSessions { active_before: std::sync::atomic::AtomicBool::new(active_before) });
        let connections = Arc::new(ConnectionManager::new("inst-1".into(), sessions.clone()));
        WebClientHub::new("inst-1".into(), sessions, connections)
    }

    #[tokio::test]
    async fn first_listener_reports_zero_to_one_transition() {
        let hub = hub(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_session_id, is_transition) = hub.connect(Uuid::new_v4(), None, tx).await.unwrap();
        assert!(is_transition);
    }

    #[tokio::test]
    async fn second_listener_for_same_user_is_not_a_transition() {
        let hub = hub(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_session_id, is_transition) = hub.connect(Uuid::new_v4(), None, tx).await.unwrap();
        assert!(!is_transition);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_matching_user() {
        let hub = hub(false);
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.connect(target, None, tx1).await.unwrap();
        hub.connect(other, None, tx2).await.unwrap();

        let frame = ListenerFrame::characteristic_update("acc-1", "On", serde_json::json!(true));
        hub.broadcast_to_user(target, &frame).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
