//! Router assembly and process lifecycle (§5 Process lifecycle, §6.5 HTTP
//! Surface): builds the axum app, claims a slot, subscribes to it, and runs
//! the background heartbeat/GC/ping loops alongside the HTTP/WS listener.

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use homecast_protocol::{SESSION_GC_INTERVAL_SECS, SLOT_HEARTBEAT_INTERVAL_SECS};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;
use crate::{http, ws_agent, ws_web};

/// Build the axum router for a fully constructed [`GatewayState`].
pub fn build_app(state: GatewayState) -> AxumRouter {
    let cors = build_cors_layer(&state.config.cors_allow_list);

    AxumRouter::new()
        .route("/health", get(http::health))
        .route("/graphql", post(http::graph_query))
        .route("/home/{home_prefix}", post(http::home_scoped))
        .route("/user/{user_id}", post(http::user_scoped))
        .route("/ws", get(ws_agent::upgrade))
        .route("/ws/web", get(ws_web::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(allow_list: &[String]) -> CorsLayer {
    if allow_list.iter().any(|o| o == "*") {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let origins: Vec<_> = allow_list
        .iter()
        .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Open the bus subscription, start the background loops, and serve until
/// `shutdown_signal` resolves. Runs a single process's full lifecycle (§5),
/// assuming `state.own_slot` already reflects whatever slot was claimed (or
/// wasn't) before construction — see [`claim_slot`].
pub async fn run(state: GatewayState, bind_port: u16) -> anyhow::Result<()> {
    let bus_task = spawn_bus_subscription(state.clone());
    let ping_task = spawn_ping_loop(state.clone());
    let gc_task = spawn_gc_loop(state.clone());
    let heartbeat_task = spawn_slot_heartbeat_loop(state.clone());

    let app = build_app(state.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], bind_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bus_task.abort();
    ping_task.abort();
    gc_task.abort();
    heartbeat_task.abort();
    shutdown(&state).await;
    Ok(())
}

/// Release this process's resources: slot lease and every session row it owns.
async fn shutdown(state: &GatewayState) {
    if let Err(err) = state.sessions.delete_by_instance(&state.instance_id).await {
        tracing::warn!(%err, "failed to clear session rows on shutdown");
    }
    if let Err(err) = state.slots.release(&state.instance_id).await {
        tracing::warn!(%err, "failed to release slot on shutdown");
    }
}

/// Claim a topic slot for `instance_id`, returning its name, or an empty
/// string if the claim failed (the process still runs, but only serves
/// agents connected directly to it — no cross-instance routing in or out).
/// Must run before [`crate::GatewayState::new`], since the Router bakes
/// `own_slot` into every outgoing `BusRequest.source_slot` at construction.
pub async fn claim_slot(slots: &dyn homecast_slots::SlotRegistry, instance_id: &str) -> String {
    match slots.claim(instance_id).await {
        Ok(slot) => {
            tracing::info!(slot = %slot.slot_name, "claimed topic slot");
            slot.slot_name
        },
        Err(err) => {
            tracing::warn!(%err, "failed to claim a slot, falling back to local-only routing");
            String::new()
        },
    }
}

fn spawn_bus_subscription(state: GatewayState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !state.bus.enabled() || state.own_slot.is_empty() {
            return;
        }
        let topic = homecast_protocol::bus::topic_for_slot(&state.config.topic_prefix, &state.own_slot);
        let mut sub = match state.bus.subscribe(&topic).await {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!(%err, %topic, "failed to subscribe to own slot topic");
                return;
            },
        };

        while let Some(delivery) = sub.recv().await {
            dispatch_bus_frame(&state, delivery.frame.clone()).await;
            delivery.ack();
        }
    })
}

async fn dispatch_bus_frame(state: &GatewayState, frame: homecast_protocol::bus::BusFrame) {
    use homecast_protocol::bus::BusFrame;
    match frame {
        BusFrame::Request(_) | BusFrame::Response(_) => state.router.handle_bus_frame(frame).await,
        BusFrame::Event(event) => state.events.handle_remote_event(event).await,
        BusFrame::ListenersChanged(lc) => {
            if let Ok(user_id) = lc.user_id.parse() {
                state.connections.notify_listeners_changed(user_id, lc.active).await;
            }
        },
    }
}

fn spawn_ping_loop(state: GatewayState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(homecast_protocol::AGENT_HEARTBEAT_INTERVAL_MS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let failed = state.connections.ping_all().await;
            for agent_id in failed {
                tracing::info!(%agent_id, "ping failed, disconnecting agent");
                state.connections.disconnect(&agent_id).await;
            }
        }
    })
}

fn spawn_gc_loop(state: GatewayState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_GC_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            match state.sessions.garbage_collect_stale().await {
                Ok(count) if count > 0 => tracing::info!(count, "garbage collected stale sessions"),
                Ok(_) => {},
                Err(err) => tracing::warn!(%err, "session garbage collection failed"),
            }
        }
    })
}

fn spawn_slot_heartbeat_loop(state: GatewayState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SLOT_HEARTBEAT_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = state.slots.heartbeat(&state.instance_id).await {
                tracing::warn!(%err, "slot heartbeat failed");
            }
        }
    })
}

/// Resolve until ctrl-c or SIGTERM for graceful shutdown hookup by callers
/// that want to pass this to `axum::serve(..).with_graceful_shutdown(..)`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
