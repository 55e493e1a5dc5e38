//! Agent socket handler for `GET /ws` (§4.3, §6.1): one persistent duplex
//! connection per headless agent.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use homecast_protocol::agent::{AgentError, AgentEventPayload, AgentFrame, FrameType};
use homecast_protocol::error_codes::{agent as agent_errors, close_codes};
use serde::Deserialize;
use uuid::Uuid;

use crate::connection::Outbound;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct AgentConnectParams {
    token: Option<String>,
    #[serde(rename = "agentId")]
    agent_id: Option<String>,
    name: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<AgentConnectParams>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: AgentConnectParams, state: GatewayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (Some(token), Some(agent_id)) = (params.token, params.agent_id) else {
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_codes::MISSING_CREDENTIALS,
                reason: "missing token or agent id".into(),
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

    let name = params
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Agent ({})", &agent_id[..agent_id.len().min(8)]));

    if let Err(err) = state.sessions.upsert_agent(user_id, &state.instance_id, &agent_id, Some(&name)).await {
        tracing::error!(%agent_id, %err, "failed to upsert agent session, refusing connection");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "session store unavailable".into(),
            })))
            .await;
        return;
    }

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Outbound>();
    let reject_tx = outbound_tx.clone();
    state.connections.connect(&agent_id, user_id, outbound_tx).await;
    tracing::info!(%agent_id, %user_id, "agent connected");

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            match msg {
                Outbound::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Outbound::Close(code, reason) => {
                    let _ = ws_tx.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                    break;
                },
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%agent_id, %err, "agent read error");
                break;
            },
        };

        let frame: AgentFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(%agent_id, %err, "malformed agent frame, rejecting");
                let error_frame = AgentFrame {
                    id: None,
                    r#type: FrameType::Response,
                    action: None,
                    payload: None,
                    error: Some(AgentError {
                        code: agent_errors::INVALID_REQUEST.into(),
                        message: "frame was not valid JSON for the agent protocol".into(),
                    }),
                };
                let json = serde_json::to_string(&error_frame).expect("AgentFrame always serializes");
                let _ = reject_tx.send(Outbound::Text(json));
                continue;
            },
        };

        if frame.r#type == FrameType::Event {
            if let Some(raw) = state.connections.handle_frame(&agent_id, frame).await {
                match serde_json::from_value::<AgentEventPayload>(raw) {
                    Ok(event) => {
                        state
                            .events
                            .handle_agent_event(user_id, event.accessory_id, event.characteristic_type, event.value)
                            .await;
                    },
                    Err(err) => tracing::warn!(%agent_id, %err, "malformed event payload, dropping"),
                }
            }
            continue;
        }

        state.connections.handle_frame(&agent_id, frame).await;
    }

    state.connections.disconnect(&agent_id).await;
    write_handle.abort();
    tracing::info!(%agent_id, "agent disconnected");
}
