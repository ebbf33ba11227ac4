//! JSON Schema projection of descriptors, shared by the OpenAPI document and
//! MCP tool listings.

use serde_json::{json, Map, Value};

use super::descriptor::{CapabilityDescriptor, ParamKind, ParameterSpec, ReturnSpec};

/// Schema for one parameter.
pub fn param_schema(spec: &ParameterSpec) -> Value {
    let mut schema = kind_schema(spec.kind);
    let obj = match schema.as_object_mut() {
        Some(obj) => obj,
        None => return schema,
    };
    if let Some(description) = &spec.description {
        obj.insert("description".into(), json!(description));
    }
    if let Some(default) = &spec.default {
        obj.insert("default".into(), default.clone());
    }
    let (min_key, max_key) = match spec.kind {
        ParamKind::String => ("minLength", "maxLength"),
        ParamKind::List => ("minItems", "maxItems"),
        _ => ("minimum", "maximum"),
    };
    if let Some(min) = spec.min {
        obj.insert(min_key.into(), number(min));
    }
    if let Some(max) = spec.max {
        obj.insert(max_key.into(), number(max));
    }
    if !spec.choices.is_empty() {
        obj.insert("enum".into(), json!(spec.choices));
    }
    if spec.multiline {
        obj.insert("x-multiline".into(), json!(true));
    }
    if !spec.fields.is_empty() {
        let (properties, required) = properties(&spec.fields);
        obj.insert("properties".into(), properties);
        if !required.is_empty() {
            obj.insert("required".into(), json!(required));
        }
    }
    if let Some(items) = &spec.items {
        obj.insert("items".into(), param_schema(items));
    }
    schema
}

/// Object schema of a capability's inputs.
pub fn input_schema(descriptor: &CapabilityDescriptor) -> Value {
    let (properties, required) = properties(&descriptor.params);
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Object schema of a capability's result.
pub fn output_schema(descriptor: &CapabilityDescriptor) -> Value {
    let mut props = Map::new();
    for ret in &descriptor.returns {
        props.insert(ret.name.clone(), return_schema(ret));
    }
    json!({
        "type": "object",
        "properties": props,
    })
}

fn return_schema(ret: &ReturnSpec) -> Value {
    let mut schema = kind_schema(ret.kind);
    if let (Some(mime), Some(obj)) = (&ret.mime, schema.as_object_mut()) {
        obj.insert("contentMediaType".into(), json!(mime));
    }
    schema
}

fn properties(params: &[ParameterSpec]) -> (Value, Vec<String>) {
    let mut props = Map::new();
    let mut required = Vec::new();
    for param in params {
        props.insert(param.name.clone(), param_schema(param));
        if param.required {
            required.push(param.name.clone());
        }
    }
    (Value::Object(props), required)
}

fn kind_schema(kind: ParamKind) -> Value {
    match kind {
        ParamKind::String | ParamKind::Enumeration => json!({"type": "string"}),
        ParamKind::Integer => json!({"type": "integer"}),
        ParamKind::Float => json!({"type": "number"}),
        ParamKind::Boolean => json!({"type": "boolean"}),
        ParamKind::Object => json!({"type": "object"}),
        ParamKind::List => json!({"type": "array"}),
        ParamKind::Image | ParamKind::Video | ParamKind::File => json!({
            "type": "string",
            "contentEncoding": "base64",
            "x-kind": kind.as_str(),
        }),
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}
