//! Listener socket handler for `GET /ws/web` (§4.6, §6.3): a web UI socket
//! that receives `characteristic_update` pushes and periodic `ping`/`pong`.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use homecast_protocol::error_codes::close_codes;
use homecast_protocol::listener::ListenerFrame;
use homecast_protocol::BUS_PUBLISH_DEADLINE_MS;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ListenerConnectParams {
    token: Option<String>,
    name: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ListenerConnectParams>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: ListenerConnectParams, state: GatewayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(token) = params.token else {
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_codes::MISSING_CREDENTIALS,
                reason: "missing token".into(),
            })))
            .await;
        return;
    };

    let claims = match state.tokens.verify(&token) {
        Ok(claims) => claims,
        Err(_) => {
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_codes::INVALID_TOKEN,
                    reason: "invalid token".into(),
                })))
                .await;
            return;
        },
    };

    let Ok(user_id) = claims.sub.parse::<Uuid>() else {
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_codes::INVALID_TOKEN,
                reason: "invalid token subject".into(),
            })))
            .await;
        return;
    };

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (session_id, became_active) = match state.hub.connect(user_id, params.name.as_deref(), outbound_tx).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(%user_id, %err, "failed to register listener session, refusing connection");
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "session store unavailable".into(),
                })))
                .await;
            return;
        },
    };
    tracing::info!(%session_id, %user_id, "listener connected");

    if became_active {
        notify_listeners_changed(&state, user_id, true).await;
    }

    let write_handle = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%session_id, %err, "listener read error");
                break;
            },
        };

        match serde_json::from_str::<ListenerFrame>(&text) {
            Ok(ListenerFrame::Ping) => {
                if let Err(err) = state.hub.heartbeat(session_id).await {
                    tracing::warn!(%session_id, %err, "failed to refresh listener heartbeat");
                }
                let pong = serde_json::to_string(&ListenerFrame::Pong).expect("ListenerFrame always serializes");
                state.hub.send_direct(session_id, pong).await;
            },
            Ok(_) => tracing::debug!(%session_id, "ignoring non-ping frame from listener"),
            Err(err) => tracing::warn!(%session_id, %err, "malformed listener frame, dropping"),
        }
    }

    if let Ok(Some((owner, became_inactive))) = state.hub.disconnect(session_id).await
        && became_inactive
    {
        notify_listeners_changed(&state, owner, false).await;
    }
    write_handle.abort();
    tracing::info!(%session_id, "listener disconnected");
}

/// Notify every local agent owned by `user_id` directly, and every other
/// live process via its slot topic, since a listener transition has no
/// single target slot the way a routed request does.
async fn notify_listeners_changed(state: &GatewayState, user_id: Uuid, active: bool) {
    state.hub.notify_local_agents(user_id, active).await;
    if !state.bus.enabled() {
        return;
    }

    let frame = homecast_protocol::bus::BusFrame::ListenersChanged(homecast_protocol::bus::BusListenersChanged {
        user_id: user_id.to_string(),
        active,
    });

    let slots = match state.slots.active_slots().await {
        Ok(slots) => slots,
        Err(err) => {
            tracing::warn!(%user_id, %err, "failed to list active slots for listeners_changed fan-out");
            return;
        },
    };

    for slot in slots {
        if slot.slot_name == state.own_slot {
            continue;
        }
        let topic = homecast_protocol::bus::topic_for_slot(&state.config.topic_prefix, &slot.slot_name);
        let publish = tokio::time::timeout(Duration::from_millis(BUS_PUBLISH_DEADLINE_MS), state.bus.publish(&topic, &frame));
        match publish.await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => tracing::warn!(slot = %slot.slot_name, %user_id, %err, "failed to publish listeners_changed"),
            Err(_) => tracing::warn!(slot = %slot.slot_name, %user_id, "publishing listeners_changed exceeded the bus publish deadline"),
        }
    }
}
