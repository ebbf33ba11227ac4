//! OpenAPI document for the request/response surface.
//!
//! The document is derived from the current registry generation. The
//! [`SchemaCache`] keeps the last one built and rebuilds whenever the
//! generation id moves, so a swap is visible on the next request.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::capabilities::schema::{input_schema, output_schema};
use crate::capabilities::{CapabilityDescriptor, RegistryGeneration};

/// OpenAPI 3 document for every capability in `generation`.
pub fn build_document(generation: &RegistryGeneration, title: &str, version: &str) -> Value {
    let mut paths = Map::new();
    for descriptor in generation.descriptors() {
        let (bundle, name) = (descriptor.key.bundle(), descriptor.key.name());
        paths.insert(
            format!("/api/{}/{}", bundle, name),
            json!({ "post": submit_operation(&descriptor) }),
        );
        if descriptor.is_queued() {
            paths.insert(
                format!("/api/{}/{}/queue", bundle, name),
                json!({ "post": poll_operation(&descriptor) }),
            );
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": title,
            "version": version,
            "x-generation": generation.id(),
        },
        "paths": paths,
        "components": {
            "schemas": {
                "Error": {
                    "type": "object",
                    "properties": {
                        "error": { "type": "integer" },
                        "description": { "type": "string" },
                        "details": { "type": "object" },
                    },
                    "required": ["error", "description"],
                },
                "QueueHandle": {
                    "type": "object",
                    "properties": { "queue_id": { "type": "string", "format": "uuid" } },
                    "required": ["queue_id"],
                },
            },
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" },
            },
        },
        "security": [{ "bearerAuth": [] }],
    })
}

/// Per-capability document, served as `docs://api/{bundle}/{capability}`.
pub fn capability_document(descriptor: &CapabilityDescriptor) -> Value {
    json!({
        "key": descriptor.key.as_str(),
        "label": descriptor.label,
        "category": descriptor.category,
        "description": descriptor.description,
        "execution_mode": descriptor.mode,
        "input_schema": input_schema(descriptor),
        "output_schema": output_schema(descriptor),
    })
}

fn submit_operation(descriptor: &CapabilityDescriptor) -> Value {
    let success = if descriptor.is_queued() {
        json!({ "$ref": "#/components/schemas/QueueHandle" })
    } else {
        output_schema(descriptor)
    };
    json!({
        "operationId": descriptor.key.as_str().replace('/', "_"),
        "summary": descriptor.label,
        "description": descriptor.description.clone().unwrap_or_default(),
        "tags": [descriptor.category],
        "requestBody": {
            "required": true,
            "content": { "application/json": { "schema": input_schema(descriptor) } },
        },
        "responses": responses(success),
    })
}

fn poll_operation(descriptor: &CapabilityDescriptor) -> Value {
    json!({
        "operationId": format!("{}_queue", descriptor.key.as_str().replace('/', "_")),
        "summary": format!("Poll {}", descriptor.label),
        "tags": [descriptor.category],
        "requestBody": {
            "required": true,
            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/QueueHandle" } } },
        },
        "responses": responses(json!({
            "oneOf": [
                { "$ref": "#/components/schemas/QueueHandle" },
                output_schema(descriptor),
            ]
        })),
    })
}

fn responses(success: Value) -> Value {
    let error = json!({
        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } },
    });
    let mut responses = Map::new();
    responses.insert(
        "200".into(),
        json!({
            "description": "Success",
            "content": { "application/json": { "schema": success } },
        }),
    );
    for (code, description) in [
        ("400", "Malformed request"),
        ("401", "Unauthorized"),
        ("404", "Unknown capability or job"),
        ("422", "Validation error"),
        ("500", "Execution error"),
        ("503", "Queue full"),
        ("504", "Execution timeout"),
    ] {
        let mut entry = error.clone();
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("description".into(), json!(description));
        }
        responses.insert(code.into(), entry);
    }
    Value::Object(responses)
}

/// Generation-scoped cache of the OpenAPI document.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    cached: Arc<Mutex<Option<(u64, Arc<Value>)>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document for `generation`, rebuilt when the generation id changed.
    pub fn document(&self, generation: &RegistryGeneration, title: &str, version: &str) -> Arc<Value> {
        let mut cached = self.cached.lock();
        if let Some((id, doc)) = cached.as_ref() {
            if *id == generation.id() {
                return Arc::clone(doc);
            }
        }
        log::debug!("Building OpenAPI document for generation {}", generation.id());
        let doc = Arc::new(build_document(generation, title, version));
        *cached = Some((generation.id(), Arc::clone(&doc)));
        doc
    }

    pub fn cached_generation(&self) -> Option<u64> {
        self.cached.lock().as_ref().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        CapabilityEntry, CapabilityKey, ExecutionMode, FnCapability, ParamKind, ParameterSpec,
        ReturnSpec,
    };
    use crate::capabilities::Arguments;
    use crate::convert::NativeValue;
    use std::collections::HashMap;

    fn generation(id: u64, keys: &[(&str, ExecutionMode)]) -> RegistryGeneration {
        let mut entries = HashMap::new();
        for (key, mode) in keys {
            let descriptor = CapabilityDescriptor::new(CapabilityKey::parse(key).unwrap(), *key)
                .with_mode(*mode)
                .with_param(ParameterSpec::new("text", ParamKind::String).required())
                .with_return(ReturnSpec::new("summary", ParamKind::String));
            let callable = FnCapability::new(1, |_a: Arguments| async move {
                Ok(vec![NativeValue::from("x")])
            });
            entries.insert(key.to_string(), CapabilityEntry::new(descriptor, callable.shared()));
        }
        RegistryGeneration::new(id, entries)
    }

    #[test]
    fn test_document_lists_paths() {
        let gen = generation(
            4,
            &[("text/summarize", ExecutionMode::Queued), ("text/analyze", ExecutionMode::Direct)],
        );
        let doc = build_document(&gen, "Nexus", "1.0");
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/text/summarize"));
        assert!(paths.contains_key("/api/text/summarize/queue"));
        assert!(paths.contains_key("/api/text/analyze"));
        assert!(!paths.contains_key("/api/text/analyze/queue"));
        assert_eq!(doc["info"]["x-generation"], 4);
        let body = &paths["/api/text/summarize"]["post"]["requestBody"]["content"]["application/json"]["schema"];
        assert_eq!(body["required"], json!(["text"]));
    }

    #[test]
    fn test_cache_follows_generation() {
        let cache = SchemaCache::new();
        let first = generation(1, &[("a/one", ExecutionMode::Direct)]);
        let doc = cache.document(&first, "Nexus", "1.0");
        assert!(doc["paths"].get("/api/a/one").is_some());
        assert!(Arc::ptr_eq(&doc, &cache.document(&first, "Nexus", "1.0")));

        let second = generation(2, &[("b/two", ExecutionMode::Direct)]);
        let doc = cache.document(&second, "Nexus", "1.0");
        assert_eq!(cache.cached_generation(), Some(2));
        assert!(doc["paths"].get("/api/a/one").is_none());
        assert!(doc["paths"].get("/api/b/two").is_some());
    }
}
