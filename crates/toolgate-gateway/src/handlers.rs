use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use toolgate_mcp::{LaunchSpec, NativeTool};
use toolgate_registry::{GatingPolicy, ToolSpec};

use crate::error::ApiError;
use crate::server::AppState;

const DEFAULT_DISCOVER_LIMIT: usize = 10;
const MAX_DISCOVER_LIMIT: usize = 50;

#[derive(Deserialize)]
pub(crate) struct DiscoverRequest {
    pub query: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ToolMatchResponse {
    tool_id: String,
    name: String,
    description: String,
    score: f32,
    matched_tags: Vec<String>,
    estimated_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
}

#[derive(Serialize)]
struct DiscoverResponse {
    tools: Vec<ToolMatchResponse>,
    query_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

pub(crate) async fn discover_tools(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = req
        .limit
        .unwrap_or(DEFAULT_DISCOVER_LIMIT)
        .clamp(1, MAX_DISCOVER_LIMIT);

    let matches = state
        .discovery
        .discover(&req.query, &req.tags, limit)
        .map_err(|e| ApiError::Registry(e.into()))?;

    let tools = matches
        .into_iter()
        .map(|m| ToolMatchResponse {
            tool_id: m.tool.id.clone(),
            name: m.tool.name.clone(),
            description: m.tool.description.clone(),
            score: m.score,
            matched_tags: m.matched_tags,
            estimated_tokens: m.tool.estimated_tokens,
            backend: m.tool.backend.clone(),
        })
        .collect();

    Ok(Json(DiscoverResponse {
        tools,
        query_id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
    }))
}

#[derive(Deserialize)]
pub(crate) struct ProvisionRequest {
    pub tool_ids: Vec<String>,
    pub max_tools: Option<usize>,
    pub max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ProvisionedToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
    token_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
}

#[derive(Serialize)]
struct ProvisionMetadata {
    total_tokens: u32,
    total_tools: usize,
    gating_applied: bool,
}

#[derive(Serialize)]
struct ProvisionResponse {
    tools: Vec<ProvisionedToolDef>,
    metadata: ProvisionMetadata,
}

pub(crate) async fn provision_tools(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = GatingPolicy {
        max_tools: req.max_tools.unwrap_or(state.gating.max_tools),
        max_tokens: req.max_tokens.unwrap_or(state.gating.max_tokens),
    };
    let set = policy.select_ids(state.proxy.registry(), &req.tool_ids)?;

    let tools: Vec<ProvisionedToolDef> = set
        .tools
        .iter()
        .map(|t| ProvisionedToolDef {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
            token_count: t.estimated_tokens,
            backend: t.backend.clone(),
        })
        .collect();

    Ok(Json(ProvisionResponse {
        metadata: ProvisionMetadata {
            total_tokens: set.total_tokens,
            total_tools: tools.len(),
            gating_applied: set.gating_applied,
        },
        tools,
    }))
}

#[derive(Serialize)]
struct RegisterResponse {
    status: &'static str,
    tool_id: String,
}

pub(crate) async fn register_tool(
    State(state): State<AppState>,
    Json(tool): Json<ToolSpec>,
) -> Result<impl IntoResponse, ApiError> {
    if tool.id.trim().is_empty() {
        return Err(ApiError::Validation("tool id must not be empty".into()));
    }
    let tool_id = tool.id.clone();
    state.proxy.registry().insert(tool)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            status: "success",
            tool_id,
        }),
    ))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    message: String,
}

pub(crate) async fn clear_tools(State(state): State<AppState>) -> impl IntoResponse {
    state.proxy.registry().clear();
    Json(StatusResponse {
        status: "success",
        message: "all tools cleared".into(),
    })
}

#[derive(Deserialize)]
pub(crate) struct ExecuteRequest {
    pub tool_id: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub(crate) async fn execute_tool(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let args = if req.arguments.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        req.arguments
    };
    let result = state.proxy.execute(&req.tool_id, args).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub(crate) struct AddServerRequest {
    pub name: String,
    pub config: LaunchSpec,
}

#[derive(Deserialize)]
pub(crate) struct RegisterServerRequest {
    pub name: String,
    pub config: LaunchSpec,
    pub tools: Vec<NativeTool>,
}

#[derive(Serialize)]
struct AddServerResponse {
    status: &'static str,
    server: String,
    tools_registered: Vec<String>,
    total_tools: usize,
}

pub(crate) async fn add_server(
    State(state): State<AppState>,
    Json(req): Json<AddServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = state.proxy.add_server(&req.name, req.config, None).await?;
    Ok(Json(AddServerResponse {
        status: "success",
        server: req.name,
        total_tools: ids.len(),
        tools_registered: ids,
    }))
}

/// AI-assisted registration: the supplied descriptors are trusted and live
/// enumeration is skipped.
pub(crate) async fn register_server_trusted(
    State(state): State<AppState>,
    Json(req): Json<RegisterServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = state
        .proxy
        .add_server(&req.name, req.config, Some(req.tools))
        .await?;
    Ok(Json(AddServerResponse {
        status: "success",
        server: req.name,
        total_tools: ids.len(),
        tools_registered: ids,
    }))
}

#[derive(Serialize)]
struct RemoveServerResponse {
    status: &'static str,
    server: String,
    tools_removed: usize,
}

pub(crate) async fn remove_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let removed = state.proxy.remove_server(&name).await;
    Json(RemoveServerResponse {
        status: "success",
        server: name,
        tools_removed: removed,
    })
}

pub(crate) async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.proxy.servers().await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
