//! Connection Manager (C3, §4.3): holds the map of agent duplex sockets on
//! this process and correlates `SendRequest` calls with the matching
//! `response` frame.
//!
//! The reply is delivered on the socket's read-loop task but awaited from
//! whatever task called [`ConnectionManager::send_request`] (a different
//! task, possibly spawned from the Cross-Instance Router) — a `oneshot`
//! channel is the cross-context-safe completion primitive the design notes
//! ask for, replacing the source's thread-drained blocking queue.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use homecast_protocol::agent::{AgentError, AgentFrame, FrameType};
use homecast_protocol::error_codes;
use homecast_routing::LocalDispatch;
use homecast_sessions::SessionRegistry;
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

/// A frame queued for delivery to an agent's write loop. Plain text frames
/// and close-with-code both travel the same channel so the write loop is
/// the only place that touches the raw WebSocket sink.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close(u16, String),
}

pub type OutboundSender = tokio::sync::mpsc::UnboundedSender<Outbound>;

struct ConnectedAgent {
    user_id: Uuid,
    sender: OutboundSender,
    connected_at: Instant,
}

struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<AgentReply>>>,
}

/// The outcome of an agent `response` frame, stripped of its correlation id.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub payload: Option<Value>,
    pub error: Option<AgentError>,
}

impl PendingRequests {
    fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    fn insert(&self, id: String, tx: oneshot::Sender<AgentReply>) {
        self.inner.lock().expect("pending requests poisoned").insert(id, tx);
    }

    fn remove(&self, id: &str) -> Option<oneshot::Sender<AgentReply>> {
        self.inner.lock().expect("pending requests poisoned").remove(id)
    }
}

/// Owns every agent socket accepted by this process.
pub struct ConnectionManager {
    instance_id: String,
    agents: RwLock<HashMap<String, ConnectedAgent>>,
    pending: PendingRequests,
    sessions: std::sync::Arc<dyn SessionRegistry>,
}

impl ConnectionManager {
    pub fn new(instance_id: String, sessions: std::sync::Arc<dyn SessionRegistry>) -> Self {
        Self {
            instance_id,
            agents: RwLock::new(HashMap::new()),
            pending: PendingRequests::new(),
            sessions,
        }
    }

    /// Register a newly-accepted agent socket, evicting any prior socket for
    /// the same `agent_id` with close code 4002 first (§4.3 `Accept`, §8
    /// "Agent replacement").
    pub async fn connect(&self, agent_id: &str, user_id: Uuid, sender: OutboundSender) {
        let mut agents = self.agents.write().await;
        if let Some(old) = agents.remove(agent_id) {
            let _ = old.sender.send(Outbound::Close(error_codes::close_codes::REPLACED, "replaced".into()));
        }
        agents.insert(
            agent_id.to_string(),
            ConnectedAgent { user_id, sender, connected_at: Instant::now() },
        );
    }

    pub async fn disconnect(&self, agent_id: &str) {
        self.agents.write().await.remove(agent_id);
        if let Err(err) = self.sessions.delete_by_agent(agent_id).await {
            tracing::warn!(agent_id, %err, "failed to delete session row on disconnect");
        }
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// First connected agent owned by `user_id` on this process, if any
    /// (§9 `get_user_device_id` local-lookup fast path).
    pub async fn agent_for_user(&self, user_id: Uuid) -> Option<String> {
        self.agents
            .read()
            .await
            .iter()
            .find(|(_, conn)| conn.user_id == user_id)
            .map(|(agent_id, _)| agent_id.clone())
    }

    pub async fn user_id_for_agent(&self, agent_id: &str) -> Option<Uuid> {
        self.agents.read().await.get(agent_id).map(|c| c.user_id)
    }

    /// Every agent owned by `user_id` connected to this process (§4.6
    /// listener-transition fan-out — the local half).
    pub async fn agents_for_user(&self, user_id: Uuid) -> Vec<String> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.user_id == user_id)
            .map(|(agent_id, _)| agent_id.clone())
            .collect()
    }

    /// Write `{type:"config", action:"listeners_changed", ...}` directly onto
    /// every local socket owned by `user_id` (§4.6).
    pub async fn notify_listeners_changed(&self, user_id: Uuid, active: bool) {
        let frame = AgentFrame::listeners_changed(active);
        let json = serde_json::to_string(&frame).expect("AgentFrame always serializes");
        let agents = self.agents.read().await;
        for (agent_id, conn) in agents.iter() {
            if conn.user_id == user_id && conn.sender.send(Outbound::Text(json.clone())).is_err() {
                tracing::debug!(agent_id, "dropped listeners_changed notice, socket already closing");
            }
        }
    }

    /// Send `{type:"ping", payload:{listenersActive}}` to every connected
    /// agent (§4.3 heartbeat emission, 30s cadence).
    pub async fn ping_all(&self) -> Vec<String> {
        let agents = self.agents.read().await;
        let mut failed = Vec::new();
        for (agent_id, conn) in agents.iter() {
            let listeners_active = self.sessions.user_has_active_listeners(conn.user_id).await.unwrap_or(false);
            let frame = AgentFrame::ping(listeners_active);
            let json = serde_json::to_string(&frame).expect("AgentFrame always serializes");
            if conn.sender.send(Outbound::Text(json)).is_err() {
                failed.push(agent_id.clone());
            }
        }
        failed
    }

    pub async fn connection_count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn connected_since(&self, agent_id: &str) -> Option<Instant> {
        self.agents.read().await.get(agent_id).map(|c| c.connected_at)
    }

    /// Write a frame directly onto `agent_id`'s socket, if still connected.
    async fn send_frame(&self, agent_id: &str, frame: AgentFrame) {
        let sender = { self.agents.read().await.get(agent_id).map(|c| c.sender.clone()) };
        let Some(sender) = sender else { return };
        let json = serde_json::to_string(&frame).expect("AgentFrame always serializes");
        let _ = sender.send(Outbound::Text(json));
    }

    /// Handle an inbound frame parsed from an agent's socket, dispatching by
    /// `frame.type` (§4.3 `OnFrame`). Returns the event payload when the
    /// frame was an `event`, so the caller can hand it to the Event Pipe
    /// without this module needing to know about it.
    pub async fn handle_frame(&self, agent_id: &str, frame: AgentFrame) -> Option<serde_json::Value> {
        match frame.r#type {
            FrameType::Response => {
                let Some(id) = frame.id else {
                    tracing::warn!(agent_id, "response frame missing id, dropping");
                    return None;
                };
                match self.pending.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(AgentReply { payload: frame.payload, error: frame.error });
                    },
                    None => tracing::debug!(agent_id, request_id = %id, "duplicate or unknown response, dropping"),
                }
                None
            },
            FrameType::Pong => {
                if let Err(err) = self.sessions.heartbeat_by_agent(agent_id).await {
                    tracing::warn!(agent_id, %err, "failed to refresh heartbeat on pong");
                }
                None
            },
            FrameType::Event => frame.payload,
            FrameType::Status => {
                tracing::info!(agent_id, payload = ?frame.payload, "agent status");
                None
            },
            FrameType::Request | FrameType::Ping | FrameType::Config => {
                tracing::warn!(agent_id, frame_type = ?frame.r#type, "unexpected frame direction from agent, rejecting");
                let error_frame = AgentFrame {
                    id: frame.id,
                    r#type: FrameType::Response,
                    action: None,
                    payload: None,
                    error: Some(AgentError {
                        code: error_codes::agent::INVALID_REQUEST.into(),
                        message: "frame type is not valid in the agent-to-relay direction".into(),
                    }),
                };
                self.send_frame(agent_id, error_frame).await;
                None
            },
        }
    }
}

#[async_trait]
impl LocalDispatch for ConnectionManager {
    /// §4.3 `SendRequest`: install a one-shot sink, send the frame, wait up
    /// to the caller's deadline, and always clear the sink afterward so a
    /// late reply can't leak state into a future correlation id.
    async fn send_local(
        &self,
        agent_id: &str,
        action: &str,
        payload: Value,
    ) -> homecast_routing::Result<Value> {
        let sender = {
            let agents = self.agents.read().await;
            agents.get(agent_id).map(|c| c.sender.clone())
        };
        let Some(sender) = sender else {
            return Err(homecast_routing::Error::AgentUnreachable);
        };

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let frame = AgentFrame::request(request_id.clone(), action, payload);
        let json = serde_json::to_string(&frame).expect("AgentFrame always serializes");
        if sender.send(Outbound::Text(json)).is_err() {
            self.pending.remove(&request_id);
            return Err(homecast_routing::Error::AgentUnreachable);
        }

        match tokio::time::timeout(Duration::from_secs(30), rx).await {
            Ok(Ok(reply)) => match reply.error {
                Some(err) => Err(homecast_routing::Error::Forwarded { code: err.code, message: err.message }),
                None => Ok(reply.payload.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(homecast_routing::Error::Timeout),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(homecast_routing::Error::Timeout)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use homecast_sessions::Session;
    use tokio::sync::mpsc;

    struct StubSessions;

    #[at]
    impl SessionRegistry for StubSessions {
        async fn upsert_agent(&self, _u: Uuid, _i: &str, _a: &str, _n: Option<&str>) -> anyhow::Result<Session> {
            unimplemented!()
        }
        async fn upsert_listener(&self, _u: Uuid, _i: &str, _n: Option<&str>) -> anyhow::Result<Uuid> {
            unimplemented!()
        }
        async fn heartbeat(&self, _s: Uuid) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn heartbeat_by_agent(&self, _a: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn delete(&self, _s: Uuid) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn delete_by_agent(&self, _a: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn delete_by_instance(&self, _i: &str) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn user_has_active_listeners(&self, _u: Uuid) -> anyhow::Result<bool> {
            Ok(false)
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

    fn manager() -> ConnectionManager {
        ConnectionManager::new("inst-1".into(), std::sync::Arc::new(StubSessions))
    }

    #[tokio::test]
    async fn second_connect_replaces_first_with_close_4002() {
        let cm = manager();
        let user_id = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        cm.connect("agent-1", user_id, tx1).await;
        cm.connect("agent-1", user_id, tx2).await;

        match rx1.recv().await.unwrap() {
            Outbound::Close(code, _) => assert_eq!(code, error_codes::close_codes::REPLACED),
            Outbound::Text(_) => panic!("expected close frame"),
        }
        assert!(cm.is_connected("agent-1").await);
    }

    #[tokio::test]
    async fn send_local_round_trips_via_response_frame() {
        let cm = std::sync::Arc::new(manager());
        let (tx, mut rx) = mpsc::unbounded_channel();
        cm.connect("agent-1", Uuid::new_v4(), tx).await;

        let cm2 = std::sync::Arc::clone(&cm);
        let handle = tokio::spawn(async move { cm2.send_local("agent-1", "ping", serde_json::json!({"x": 1})).await });

        let sent = rx.recv().await.unwrap();
        let Outbound::Text(json) = sent else { panic!("expected text frame") };
        let frame: AgentFrame = serde_json::from_str(&json).unwrap();
        let id = frame.id.unwrap();

        let reply = AgentFrame::response_ok(id, serde_json::json!({"ok": true}));
        cm.handle_frame("agent-1", reply).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn send_local_fails_fast_when_agent_not_connected() {
        let cm = manager();
        let err = cm.send_local("ghost", "ping", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code(), homecast_protocol::error_codes::routing::AGENT_UNREACHABLE);
    }

    #[tokio::test]
    async fn duplicate_response_for_unknown_request_id_is_dropped() {
        let cm = manager();
        // Should not panic even though nothing is pending.
        let result = cm.handle_frame("agent-1", AgentFrame::response_ok("unknown", serde_json::json!(null))).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wrong_direction_frame_gets_invalid_request_response() {
        let cm = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        cm.connect("agent-1", Uuid::new_v4(), tx).await;

        let bogus = AgentFrame::request("req-1", "ping", serde_json::json!({}));
        let result = cm.handle_frame("agent-1", bogus).await;
        assert!(result.is_none());

        let sent = rx.recv().await.unwrap();
        let Outbound::Text(json) = sent else { panic!("expected text frame") };
        let frame: AgentFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame.id.as_deref(), Some("req-1"));
        assert_eq!(frame.error.unwrap().code, error_codes::agent::INVALID_REQUEST);
    }
}
