//! HTTP surface (§6.5): liveness probe, the generic graph-query passthrough,
//! and the two scope-resolved tool-protocol mounts. The graph-query and
//! tool-protocol surfaces themselves are external adapters (§1 Out of
//! scope) — this crate only provides the interface each needs to reach
//! `Router::route`, not their domain schemas.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::IngressError;
use crate::state::GatewayState;

const ROUTE_DEADLINE: Duration = Duration::from_secs(30);

pub async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": state.connection_count().await,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GraphQueryRequest {
    #[serde(rename = "agentId")]
    agent_id: String,
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Generic `Route(agentID, action, payload)` passthrough for the graph-query
/// adapter (§1, §3 data flow). The adapter owns auth and schema; the relay
/// only forwards.
pub async fn graph_query(
    State(state): State<GatewayState>,
    Json(req): Json<GraphQueryRequest>,
) -> Result<Response, IngressError> {
    let payload = state.router.route(&req.agent_id, &req.action, req.payload, ROUTE_DEADLINE).await?;
    Ok(Json(payload).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ScopedActionBody {
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn bearer_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

pub async fn home_scoped(
    State(state): State<GatewayState>,
    Path(home_prefix): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ScopedActionBody>,
) -> Result<Response, IngressError> {
    let scope = state.scope.resolve_home(&home_prefix, bearer_header(&headers)).await?;
    route_scoped(&state, scope.user_id, &body.action, body.payload).await
}

pub async fn user_scoped(
    State(state): State<GatewayState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ScopedActionBody>,
) -> Result<Response, IngressError> {
    let scope = state.scope.resolve_user(user_id, bearer_header(&headers)).await?;
    route_scoped(&state, scope.user_id, &body.action, body.payload).await
}

async fn route_scoped(state: &GatewayState, user_id: Uuid, action: &str, payload: serde_json::Value) -> Result<Response, IngressError> {
    let agent_id = state
        .agent_for_user(user_id)
        .await
        .map_err(|_| homecast_routing::Error::AgentUnreachable)?
        .ok_or(homecast_routing::Error::AgentUnreachable)?;

    let result = state.router.route(&agent_id, action, payload, ROUTE_DEADLINE).await?;
    let body = serde_json::to_vec(&result).expect("Value always serializes");

    let Some(spliced) = maybe_splice_state(state, &agent_id, &body).await else {
        return Ok(Json(result).into_response());
    };

    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        spliced,
    )
        .into_response())
}

/// If the response contains the live-state placeholder, fetch a fresh state
/// snapshot from the owning agent and splice it in (§4.8 Design Notes).
/// Absent placeholder: `None`, so the caller forwards the body untouched.
async fn maybe_splice_state(state: &GatewayState, agent_id: &str, body: &[u8]) -> Option<Vec<u8>> {
    if !String::from_utf8_lossy(body).contains(homecast_scope::STATE_PLACEHOLDER) {
        return None;
    }
    let snapshot = state.router.route(agent_id, "get_state", serde_json::Value::Null, ROUTE_DEADLINE).await.ok()?;
    let state_json = serde_json::to_string(&snapshot).ok()?;
    homecast_scope::splice_state(body, &state_json)
}
