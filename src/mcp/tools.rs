//! Capability-to-tool mapping.
//!
//! A tool name is the capability key with `/` replaced by `_`. That mapping
//! is not reversible (`a_b/c` and `a/b_c` collide), so incoming names are
//! always resolved by scanning the current generation.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::capabilities::schema::input_schema;
use crate::capabilities::{CapabilityDescriptor, CapabilityKey, RegistryGeneration};
use crate::config::McpToolsConfig;

pub fn tool_name(key: &CapabilityKey) -> String {
    key.as_str().replace('/', "_")
}

/// Which capabilities are published as tools.
#[derive(Debug, Clone)]
pub struct ToolFilter {
    auto_map: bool,
    /// Capability keys or whole bundle names.
    excluded: HashSet<String>,
}

impl ToolFilter {
    pub fn from_config(tools: &McpToolsConfig) -> Self {
        Self {
            auto_map: tools.auto_map_apis,
            excluded: tools.excluded_apis.iter().cloned().collect(),
        }
    }

    pub fn allows(&self, key: &CapabilityKey) -> bool {
        self.auto_map && !self.excluded.contains(key.as_str()) && !self.excluded.contains(key.bundle())
    }

    /// Published descriptors, sorted by key.
    pub fn published(&self, generation: &RegistryGeneration) -> Vec<Arc<CapabilityDescriptor>> {
        let mut descriptors: Vec<_> = generation
            .descriptors()
            .into_iter()
            .filter(|d| self.allows(&d.key))
            .collect();
        descriptors.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        descriptors
    }

    /// Descriptor published under `name`, if any.
    pub fn find(&self, generation: &RegistryGeneration, name: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.published(generation)
            .into_iter()
            .find(|d| tool_name(&d.key) == name)
    }
}

/// `tools/list` entry for one capability.
pub fn tool_definition(descriptor: &CapabilityDescriptor) -> Value {
    let mut description = descriptor
        .description
        .clone()
        .unwrap_or_else(|| descriptor.label.clone());
    if descriptor.is_queued() {
        description.push_str(
            " Runs as a background job: the result is a queue_id to read from queue://{queue_id}.",
        );
    }
    json!({
        "name": tool_name(&descriptor.key),
        "title": descriptor.label,
        "description": description,
        "inputSchema": input_schema(descriptor),
    })
}

/// Successful `tools/call` result.
pub fn tool_result(body: &Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": body.to_string() }],
        "isError": false,
    })
}

/// Failed `tools/call` result carrying the error envelope.
pub fn tool_error(envelope: &Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": envelope.to_string() }],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        Arguments, CapabilityEntry, ExecutionMode, FnCapability, ParamKind, ParameterSpec,
    };
    use crate::convert::NativeValue;
    use std::collections::HashMap;

    fn generation(keys: &[&str]) -> RegistryGeneration {
        let mut entries = HashMap::new();
        for key in keys {
            let descriptor = CapabilityDescriptor::new(CapabilityKey::parse(key).unwrap(), *key)
                .with_param(ParameterSpec::new("text", ParamKind::String).required());
            let callable = FnCapability::new(1, |_a: Arguments| async move {
                Ok(vec![NativeValue::from("x")])
            });
            entries.insert(key.to_string(), CapabilityEntry::new(descriptor, callable.shared()));
        }
        RegistryGeneration::new(1, entries)
    }

    fn filter(auto_map: bool, excluded: &[&str]) -> ToolFilter {
        ToolFilter::from_config(&McpToolsConfig {
            auto_map_apis: auto_map,
            excluded_apis: excluded.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_colliding_names_resolve_by_scan() {
        let gen = generation(&["a_b/c", "x/y"]);
        let found = filter(true, &[]).find(&gen, "a_b_c").unwrap();
        assert_eq!(found.key.as_str(), "a_b/c");
        assert!(filter(true, &[]).find(&gen, "a/b_c").is_none());
    }

    #[test]
    fn test_exclusions_by_key_and_bundle() {
        let gen = generation(&["text/summarize", "text/analyze", "image/resize"]);
        let names: Vec<_> = filter(true, &["text/analyze"])
            .published(&gen)
            .iter()
            .map(|d| tool_name(&d.key))
            .collect();
        assert_eq!(names, vec!["image_resize", "text_summarize"]);

        assert_eq!(filter(true, &["text"]).published(&gen).len(), 1);
        assert!(filter(false, &[]).published(&gen).is_empty());
    }

    #[test]
    fn test_queued_tool_mentions_queue() {
        let descriptor = CapabilityDescriptor::new(CapabilityKey::parse("t/s").unwrap(), "S")
            .with_mode(ExecutionMode::Queued);
        let def = tool_definition(&descriptor);
        assert_eq!(def["name"], "t_s");
        assert!(def["description"].as_str().unwrap().contains("queue://"));
        assert_eq!(def["inputSchema"]["type"], "object");
    }

    #[test]
    fn test_tool_result_shapes() {
        let ok = tool_result(&json!({"summary": "A."}));
        assert_eq!(ok["isError"], false);
        let text = ok["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap()["summary"], "A.");
        assert_eq!(tool_error(&json!({"error": 404}))["isError"], true);
    }
}
