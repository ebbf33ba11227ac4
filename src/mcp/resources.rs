//! Readable resources: job status and API documentation.
//!
//! - `queue://{queue_id}`: one of the caller's jobs
//! - `docs://openapi.json`: the OpenAPI document of the current generation
//! - `docs://api/{bundle}/{capability}`: one capability's schema

use serde_json::{json, Value};

use super::protocol::RpcError;
use crate::error::NexusError;
use crate::queue::parse_job_id;
use crate::server::openapi::capability_document;
use crate::server::routes::{AppState, API_TITLE};

const JSON_MIME: &str = "application/json";

/// A parsed resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Queue(String),
    OpenApi,
    CapabilityDoc { bundle: String, capability: String },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Option<Self> {
        if let Some(id) = uri.strip_prefix("queue://") {
            return (!id.is_empty()).then(|| Self::Queue(id.to_string()));
        }
        let path = uri.strip_prefix("docs://")?;
        if path == "openapi.json" {
            return Some(Self::OpenApi);
        }
        let (bundle, capability) = path.strip_prefix("api/")?.split_once('/')?;
        if bundle.is_empty() || capability.is_empty() || capability.contains('/') {
            return None;
        }
        Some(Self::CapabilityDoc {
            bundle: bundle.to_string(),
            capability: capability.to_string(),
        })
    }
}

/// `resources/list` entries visible to `owner`.
pub fn list_resources(state: &AppState, owner: &str) -> Vec<Value> {
    let settings = &state.nexus.config().mcp_server.resources;
    let mut resources = Vec::new();
    if settings.expose_docs {
        resources.push(json!({
            "uri": "docs://openapi.json",
            "name": "OpenAPI document",
            "mimeType": JSON_MIME,
        }));
        let generation = state.nexus.registry().current();
        let mut descriptors = generation.descriptors();
        descriptors.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        for descriptor in descriptors {
            resources.push(json!({
                "uri": format!("docs://api/{}", descriptor.key.as_str()),
                "name": descriptor.label,
                "description": descriptor.description,
                "mimeType": JSON_MIME,
            }));
        }
    }
    if settings.expose_queue {
        for job in state.nexus.queue().jobs_for_owner(owner) {
            resources.push(json!({
                "uri": format!("queue://{}", job.queue_id),
                "name": format!("{} job ({})", job.capability, job.status),
                "mimeType": JSON_MIME,
            }));
        }
    }
    resources
}

/// `resources/templates/list` entries.
pub fn resource_templates(state: &AppState) -> Vec<Value> {
    let settings = &state.nexus.config().mcp_server.resources;
    let mut templates = Vec::new();
    if settings.expose_queue {
        templates.push(json!({
            "uriTemplate": "queue://{queue_id}",
            "name": "Queued job",
            "description": "Status and result of a queued capability call",
            "mimeType": JSON_MIME,
        }));
    }
    if settings.expose_docs {
        templates.push(json!({
            "uriTemplate": "docs://api/{bundle}/{capability}",
            "name": "Capability documentation",
            "mimeType": JSON_MIME,
        }));
    }
    templates
}

/// `resources/read` result for `uri`.
pub fn read_resource(state: &AppState, uri: &str, owner: &str) -> Result<Value, RpcError> {
    let body = match resource_body(state, uri, owner) {
        Ok(Some(body)) => body,
        Ok(None) => {
            let mut err = RpcError::new(
                RpcError::RESOURCE_NOT_FOUND,
                format!("Resource not found: {}", uri),
            );
            err.data = Some(json!({ "uri": uri }));
            return Err(err);
        }
        Err(e) => return Err(RpcError::from_envelope(&state.nexus.envelope(&e))),
    };
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": JSON_MIME,
            "text": body.to_string(),
        }]
    }))
}

/// Resource body, or `None` when nothing is published at `uri`.
fn resource_body(state: &AppState, uri: &str, owner: &str) -> Result<Option<Value>, NexusError> {
    let settings = &state.nexus.config().mcp_server.resources;
    let Some(parsed) = ResourceUri::parse(uri) else {
        return Ok(None);
    };
    let body = match parsed {
        ResourceUri::Queue(raw) if settings.expose_queue => {
            let id = parse_job_id(&raw)?;
            let queue = state.nexus.queue();
            let view = queue.poll(id, owner)?;
            let job = queue
                .job(id)
                .ok_or_else(|| NexusError::JobNotFound(id.to_string()))?;
            let mut body = json!(job.summary());
            if !view.is_pending() {
                body["response"] = view.to_value();
            }
            body
        }
        ResourceUri::OpenApi if settings.expose_docs => {
            let generation = state.nexus.registry().current();
            let doc = state
                .schema_cache
                .document(&generation, API_TITLE, crate::VERSION);
            (*doc).clone()
        }
        ResourceUri::CapabilityDoc { bundle, capability } if settings.expose_docs => {
            let key = format!("{}/{}", bundle, capability);
            let entry = state.nexus.registry().resolve(&key)?;
            capability_document(&entry.descriptor)
        }
        _ => return Ok(None),
    };
    Ok(Some(body))
}
