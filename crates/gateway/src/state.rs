//! Process-scoped owned state (§9 "Global mutable singletons" re-architecture):
//! the Connection Manager, Router, and Web Client Hub are constructed once at
//! startup and threaded through as `Arc`s rather than reached via globals.

use std::sync::Arc;

use homecast_auth::TokenAuthority;
use homecast_bus::BusAdapter;
use homecast_config::RelayConfig;
use homecast_db::{HomeStore, SettingsStore};
use homecast_routing::Router;
use homecast_scope::ScopeRouter;
use homecast_sessions::SessionRegistry;
use homecast_slots::SlotRegistry;
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::web_clients::{EventPipe, WebClientHub};

#[derive(Clone)]
pub struct GatewayState {
    pub instance_id: String,
    /// The topic slot this process claimed at startup (empty if the claim
    /// failed and it's running local-only). Fixed for the process's whole
    /// lifetime — the Router bakes the same value into every outgoing
    /// `BusRequest.source_slot`, so it must be final before either is built.
    pub own_slot: String,
    pub version: String,
    pub config: Arc<RelayConfig>,
    pub connections: Arc<ConnectionManager>,
    pub hub: Arc<WebClientHub>,
    pub events: Arc<EventPipe>,
    pub router: Arc<Router>,
    pub scope: Arc<ScopeRouter>,
    pub tokens: Arc<TokenAuthority>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub slots: Arc<dyn SlotRegistry>,
    pub bus: Arc<dyn BusAdapter>,
}

impl GatewayState {
    /// Wire up the relay fabric in the dependency order its pieces require:
    /// Connection Manager first (no upstream deps), then the Router (needs
    /// local dispatch), then the Hub/Event Pipe (need the Router for bus
    /// publication and the Connection Manager for local notification).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance_id: String,
        own_slot: String,
        version: String,
        config: Arc<RelayConfig>,
        sessions: Arc<dyn SessionRegistry>,
        slots: Arc<dyn SlotRegistry>,
        bus: Arc<dyn BusAdapter>,
        homes: Arc<dyn HomeStore>,
        settings: Arc<dyn SettingsStore>,
        tokens: Arc<TokenAuthority>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(instance_id.clone(), sessions.clone()));

        let router = Arc::new(Router::new(
            instance_id.clone(),
            own_slot.clone(),
            config.topic_prefix.clone(),
            config.force_bus,
            sessions.clone(),
            slots.clone(),
            bus.clone(),
            connections.clone() as Arc<dyn homecast_routing::LocalDispatch>,
        ));

        let hub = Arc::new(WebClientHub::new(instance_id.clone(), sessions.clone(), connections.clone()));
        let events = Arc::new(EventPipe::new(hub.clone(), router.clone()));
        let scope = Arc::new(ScopeRouter::new(homes, settings, tokens.clone()));

        Self {
            instance_id,
            own_slot,
            version,
            config,
            connections,
            hub,
            events,
            router,
            scope,
            tokens,
            sessions,
            slots,
            bus,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.connection_count().await + self.hub.client_count().await
    }

    /// Resolve "the" agent for a user for the graph-query surface, preferring
    /// a socket already on this process before falling back to the
    /// cross-process Session Registry (§9 `get_user_device_id`-equivalent).
    pub async fn agent_for_user(&self, user_id: Uuid) -> anyhow::Result<Option<String>> {
        if !self.config.force_bus {
            if let Some(agent_id) = self.connections.agent_for_user(user_id).await {
                return Ok(Some(agent_id));
            }
        }
        self.sessions.agent_for_user(user_id).await
    }
}
