use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::super::AppState;
use super::super::auth::KeyName;
use super::invalid_body;
use crate::core::agent::{DispatchReport, Params};
use crate::core::error::GatewayResult;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub agent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub agent_name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> GatewayResult<Json<Value>> {
    let snapshot = state.registry().status(query.agent_name.as_deref()).await?;
    let mut body = json!({ "success": true, "timestamp": Utc::now().to_rfc3339() });
    merge(&mut body, serde_json::to_value(snapshot).unwrap_or_default());
    Ok(Json(body))
}

pub async fn get_summary(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({ "success": true, "timestamp": Utc::now().to_rfc3339() });
    merge(
        &mut body,
        serde_json::to_value(state.registry().summary().await).unwrap_or_default(),
    );
    Json(body)
}

/// `POST /api/agents/{agent}/trigger`. Failed runs still answer 200 with `success: false`.
pub async fn trigger_agent(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Extension(KeyName(key_name)): Extension<KeyName>,
    params: Result<Json<Params>, JsonRejection>,
) -> Result<Json<DispatchReport>, Response> {
    let Json(params) = params.map_err(invalid_body)?;
    info!("Agent {} triggered by key {}", agent, key_name);
    let report = state
        .facade
        .dispatch(&agent, params)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(report))
}

/// `GET /api/agents/capabilities` (every agent) and `GET /api/agents/{agent}/capabilities`.
pub async fn get_all_capabilities(State(state): State<AppState>) -> GatewayResult<Json<Value>> {
    capabilities_body(&state, None).await
}

pub async fn get_capabilities(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> GatewayResult<Json<Value>> {
    capabilities_body(&state, Some(&agent)).await
}

async fn capabilities_body(state: &AppState, agent: Option<&str>) -> GatewayResult<Json<Value>> {
    let snapshot = state.registry().capabilities(agent).await?;
    let mut body = json!({ "success": true });
    merge(&mut body, serde_json::to_value(snapshot).unwrap_or_default());
    Ok(Json(body))
}

pub async fn enable_agent(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> GatewayResult<Json<Value>> {
    let descriptor = state.registry().enable(&agent).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Agent {} enabled", agent),
        "agent_status": descriptor
    })))
}

pub async fn disable_agent(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> GatewayResult<Json<Value>> {
    let descriptor = state.registry().disable(&agent).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Agent {} disabled", agent),
        "agent_status": descriptor
    })))
}

pub async fn add_trigger(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    req: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<Json<Value>, Response> {
    let Json(req) = req.map_err(invalid_body)?;
    let trigger = state
        .registry()
        .add_workflow_trigger(&agent, &req.name, req.config)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow trigger added to {}", agent),
        "trigger": {
            "name": trigger.name,
            "config": trigger.config,
            "agent": agent,
            "added_at": trigger.added_at
        }
    })))
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let history = state
        .facade
        .get_execution_history(query.agent_name.as_deref(), query.limit.unwrap_or(100))
        .await;
    Json(json!({
        "success": true,
        "total_entries": history.len(),
        "history": history,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}
