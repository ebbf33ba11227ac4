//! `POST /mcp`: JSON-RPC dispatch for the tool/resource surface.
//!
//! Tool calls go through the same [`Dispatcher`](crate::dispatch::Dispatcher)
//! as the HTTP routes, so both adapters share one registry generation, one
//! queue and one error envelope.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use super::protocol::{RpcError, RpcRequest, RpcResponse, JSONRPC_VERSION, PROTOCOL_VERSION};
use super::resources::{list_resources, read_resource, resource_templates};
use super::tools::{tool_definition, tool_error, tool_result, ToolFilter};
use crate::server::auth::ANONYMOUS_OWNER;
use crate::server::routes::AppState;

pub async fn mcp_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let owner = if state.nexus.config().mcp_server.security.require_authentication {
        match state.keys.authenticate(&headers) {
            Ok(owner) => owner,
            Err(e) => return state.reject(e).into_response(),
        }
    } else {
        ANONYMOUS_OWNER.to_string()
    };

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => return reply(RpcResponse::failure(Value::Null, RpcError::parse_error(e.to_string()))),
    };
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return reply(RpcResponse::failure(
                Value::Null,
                RpcError::invalid_request(e.to_string()),
            ))
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        let id = request.id.clone().unwrap_or(Value::Null);
        return reply(RpcResponse::failure(
            id,
            RpcError::invalid_request("jsonrpc must be \"2.0\""),
        ));
    }
    if request.is_notification() {
        log::debug!("MCP notification: {}", request.method);
        return StatusCode::ACCEPTED.into_response();
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match handle_request(&state, &request, &owner).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(err) => {
            log::debug!("MCP {} failed: {}", request.method, err);
            RpcResponse::failure(id, err)
        }
    };
    reply(response)
}

fn reply(response: RpcResponse) -> Response {
    Json(response).into_response()
}

async fn handle_request(state: &AppState, request: &RpcRequest, owner: &str) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "initialize" => Ok(initialize(state)),
        "ping" => Ok(json!({})),
        "tools/list" => {
            let filter = ToolFilter::from_config(&state.nexus.config().mcp_server.tools);
            let generation = state.nexus.registry().current();
            let tools: Vec<Value> = filter
                .published(&generation)
                .iter()
                .map(|d| tool_definition(d))
                .collect();
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => call_tool(state, request, owner).await,
        "resources/list" => Ok(json!({ "resources": list_resources(state, owner) })),
        "resources/templates/list" => {
            Ok(json!({ "resourceTemplates": resource_templates(state) }))
        }
        "resources/read" => read_resource(state, request.param_str("uri")?, owner),
        other => Err(RpcError::method_not_found(other)),
    }
}

fn initialize(state: &AppState) -> Value {
    let mcp = &state.nexus.config().mcp_server;
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
        },
        "serverInfo": {
            "name": mcp.server_info.name,
            "version": mcp.server_info.version,
        },
        "instructions": mcp.server_info.description,
    })
}

/// Capability failures become `isError` results; only protocol problems
/// are JSON-RPC errors.
async fn call_tool(state: &AppState, request: &RpcRequest, owner: &str) -> Result<Value, RpcError> {
    let name = request.param_str("name")?;
    let arguments = match request.params.get("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => args.clone(),
        Some(_) => return Err(RpcError::invalid_params("arguments must be an object")),
    };

    let filter = ToolFilter::from_config(&state.nexus.config().mcp_server.tools);
    let generation = state.nexus.registry().current();
    let descriptor = filter
        .find(&generation, name)
        .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {}", name)))?;
    drop(generation);

    log::info!("MCP tool call {} -> {}", name, descriptor.key.as_str());
    match state
        .nexus
        .dispatcher()
        .invoke(descriptor.key.as_str(), arguments, owner)
        .await
    {
        Ok(outcome) => Ok(tool_result(&outcome.to_value())),
        Err(e) => Ok(tool_error(&state.nexus.envelope(&e).to_value())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
