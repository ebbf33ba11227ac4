//! Wire ⇄ native conversion driven by a descriptor.
//!
//! Inbound, a flat JSON object of `name → wire value` is checked against the
//! parameter specs (defaults applied, bounds and choices enforced) and then
//! materialized: media payloads become pixel buffers or scoped temp files.
//! Outbound, the callable's positional outputs are named after the return
//! specs and media values are re-encoded as base64 data URIs.

use std::path::PathBuf;

use serde_json::{Map, Value};

use super::media::{
    decode_image, decode_payload, encode_data_uri, encode_png, extension_for_mime, mime_for_path,
    sniff_mime,
};
use super::scope::TempScope;
use super::value::NativeValue;
use crate::capabilities::capability::Arguments;
use crate::capabilities::descriptor::{CapabilityDescriptor, ParamKind, ParameterSpec};
use crate::error::{NexusError, ValidationError};

/// Stateless converter configured with the temp directory policy.
#[derive(Debug, Clone)]
pub struct Converter {
    temp_dir: PathBuf,
    clear_after_processing: bool,
}

impl Converter {
    pub fn new(temp_dir: impl Into<PathBuf>, clear_after_processing: bool) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            clear_after_processing,
        }
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        &self.temp_dir
    }

    /// Validate raw arguments and apply defaults without materializing media.
    ///
    /// The returned object is what a queued job persists; feeding it back
    /// through [`Converter::decode`] yields the same arguments.
    pub fn validate_wire(
        &self,
        descriptor: &CapabilityDescriptor,
        raw: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ValidationError> {
        let mut normalized = Map::new();
        for spec in &descriptor.params {
            match raw.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let checked = check_value(spec, value, &spec.name)?;
                    normalized.insert(spec.name.clone(), checked);
                }
                None => match &spec.default {
                    Some(default) => {
                        normalized.insert(spec.name.clone(), default.clone());
                    }
                    None if spec.required => {
                        return Err(ValidationError::new(&spec.name, "is required"));
                    }
                    None => {}
                },
            }
        }
        for name in raw.keys() {
            if descriptor.param(name).is_none() {
                log::debug!("Ignoring undeclared argument '{}' for {}", name, descriptor.key);
            }
        }
        Ok(normalized)
    }

    /// Convert raw arguments into native ones.
    ///
    /// Temp files created for `video`/`file` parameters belong to the returned
    /// scope; keep it alive for the duration of the call.
    pub fn decode(
        &self,
        descriptor: &CapabilityDescriptor,
        raw: &Map<String, Value>,
    ) -> Result<(Arguments, TempScope), NexusError> {
        let normalized = self.validate_wire(descriptor, raw)?;
        let mut scope = TempScope::new(&self.temp_dir, !self.clear_after_processing);
        let mut args = Arguments::new();
        for spec in &descriptor.params {
            if let Some(value) = normalized.get(&spec.name) {
                let native = self.materialize(spec, value, &mut scope)?;
                args.insert(spec.name.clone(), native);
            }
        }
        Ok((args, scope))
    }

    fn materialize(
        &self,
        spec: &ParameterSpec,
        value: &Value,
        scope: &mut TempScope,
    ) -> Result<NativeValue, NexusError> {
        let native = match spec.kind {
            ParamKind::String | ParamKind::Enumeration => {
                NativeValue::String(value.as_str().unwrap_or_default().to_string())
            }
            ParamKind::Integer => NativeValue::Integer(as_integer(value).unwrap_or_default()),
            ParamKind::Float => NativeValue::Float(value.as_f64().unwrap_or_default()),
            ParamKind::Boolean => NativeValue::Bool(value.as_bool().unwrap_or_default()),
            ParamKind::Object | ParamKind::List => NativeValue::Json(value.clone()),
            ParamKind::Image => {
                let payload = decode_media(spec, value)?;
                let buffer = decode_image(&payload.bytes)
                    .map_err(|_| ValidationError::new(&spec.name, "is not a decodable image"))?;
                NativeValue::Image(buffer)
            }
            ParamKind::Video | ParamKind::File => {
                let payload = decode_media(spec, value)?;
                let path = scope
                    .materialize(&payload.bytes, extension_for_mime(&payload.mime()))
                    .map_err(|e| NexusError::Execution {
                        message: format!("failed to write temp file for '{}': {}", spec.name, e),
                    })?;
                NativeValue::Path(path)
            }
        };
        Ok(native)
    }

    /// Turn positional outputs into the named result object.
    ///
    /// A count that differs from the declared returns is an execution error.
    /// Capabilities without declared returns name outputs `output_{i}`.
    pub fn encode(
        &self,
        descriptor: &CapabilityDescriptor,
        outputs: Vec<NativeValue>,
    ) -> Result<Value, NexusError> {
        if !descriptor.returns.is_empty() && outputs.len() != descriptor.returns.len() {
            return Err(NexusError::Execution {
                message: format!(
                    "{} returned {} values but declares {}",
                    descriptor.key,
                    outputs.len(),
                    descriptor.returns.len()
                ),
            });
        }
        let mut result = Map::new();
        for (index, output) in outputs.into_iter().enumerate() {
            let declared_mime = descriptor.returns.get(index).and_then(|r| r.mime.as_deref());
            let name = descriptor.return_name(index);
            let wire = encode_output(&name, output, declared_mime)?;
            result.insert(name, wire);
        }
        Ok(Value::Object(result))
    }
}

fn encode_output(
    name: &str,
    output: NativeValue,
    declared_mime: Option<&str>,
) -> Result<Value, NexusError> {
    let wire = match output {
        NativeValue::Image(buffer) => {
            let png = encode_png(&buffer).map_err(|e| NexusError::Execution {
                message: format!("output '{}': {}", name, e),
            })?;
            Value::String(encode_data_uri("image/png", &png))
        }
        NativeValue::Path(path) => {
            let bytes = std::fs::read(&path).map_err(|e| NexusError::Execution {
                message: format!("output '{}': cannot read {}: {}", name, path.display(), e),
            })?;
            let mime = declared_mime
                .or_else(|| mime_for_path(&path))
                .unwrap_or_else(|| sniff_mime(&bytes));
            Value::String(encode_data_uri(mime, &bytes))
        }
        other => other.scalar_json().ok_or_else(|| NexusError::Execution {
            message: format!("output '{}' is not representable as JSON", name),
        })?,
    };
    Ok(wire)
}

fn decode_media(
    spec: &ParameterSpec,
    value: &Value,
) -> Result<super::media::MediaPayload, ValidationError> {
    let text = value
        .as_str()
        .ok_or_else(|| ValidationError::new(&spec.name, "must be a base64 string"))?;
    decode_payload(text).map_err(|e| ValidationError::new(&spec.name, e.to_string()))
}

fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Check one wire value against its spec, returning the normalized value.
///
/// `path` is the field name reported on failure; nested values extend it
/// (`options.depth`, `tags[2]`). Media payloads are checked for base64
/// well-formedness only.
pub fn check_value(spec: &ParameterSpec, value: &Value, path: &str) -> Result<Value, ValidationError> {
    let fail = |constraint: String| ValidationError::new(path, constraint);
    match spec.kind {
        ParamKind::String => {
            let s = value.as_str().ok_or_else(|| fail("must be a string".into()))?;
            check_bounds(spec, s.chars().count() as f64, path, "length")?;
            Ok(value.clone())
        }
        ParamKind::Enumeration => {
            let s = value.as_str().ok_or_else(|| fail("must be a string".into()))?;
            if spec.choices.iter().any(|c| c == s) {
                Ok(value.clone())
            } else {
                Err(fail(format!("must be one of [{}]", spec.choices.join(", "))))
            }
        }
        ParamKind::Integer => {
            let n = as_integer(value).ok_or_else(|| fail("must be an integer".into()))?;
            check_bounds(spec, n as f64, path, "value")?;
            Ok(Value::Number(n.into()))
        }
        ParamKind::Float => {
            let f = value.as_f64().ok_or_else(|| fail("must be a number".into()))?;
            check_bounds(spec, f, path, "value")?;
            Ok(value.clone())
        }
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(fail("must be a boolean".into())),
        },
        ParamKind::Image | ParamKind::Video | ParamKind::File => {
            let s = value
                .as_str()
                .ok_or_else(|| fail("must be a base64 string".into()))?;
            decode_payload(s).map_err(|e| fail(e.to_string()))?;
            Ok(value.clone())
        }
        ParamKind::Object => {
            let object = value
                .as_object()
                .ok_or_else(|| fail("must be an object".into()))?;
            if spec.fields.is_empty() {
                return Ok(value.clone());
            }
            let mut out = object.clone();
            for field in &spec.fields {
                let field_path = format!("{}.{}", path, field.name);
                match object.get(&field.name).filter(|v| !v.is_null()) {
                    Some(inner) => {
                        out.insert(field.name.clone(), check_value(field, inner, &field_path)?);
                    }
                    None => match &field.default {
                        Some(default) => {
                            out.insert(field.name.clone(), default.clone());
                        }
                        None if field.required => {
                            return Err(ValidationError::new(field_path, "is required"));
                        }
                        None => {}
                    },
                }
            }
            Ok(Value::Object(out))
        }
        ParamKind::List => {
            let items = value
                .as_array()
                .ok_or_else(|| fail("must be a list".into()))?;
            check_bounds(spec, items.len() as f64, path, "length")?;
            match &spec.items {
                Some(item_spec) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| check_value(item_spec, item, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                None => Ok(value.clone()),
            }
        }
    }
}

fn check_bounds(spec: &ParameterSpec, n: f64, path: &str, what: &str) -> Result<(), ValidationError> {
    let subject = if what == "value" { "must be" } else { "length must be" };
    if let Some(min) = spec.min {
        if n < min {
            return Err(ValidationError::new(path, format!("{} >= {}", subject, render_bound(min))));
        }
    }
    if let Some(max) = spec.max {
        if n > max {
            return Err(ValidationError::new(path, format!("{} <= {}", subject, render_bound(max))));
        }
    }
    Ok(())
}

fn render_bound(bound: f64) -> String {
    if bound.fract() == 0.0 && bound.abs() < 1e15 {
        (bound as i64).to_string()
    } else {
        bound.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::descriptor::{CapabilityKey, ReturnSpec};
    use crate::convert::media;
    use crate::convert::PixelBuffer;
    use serde_json::json;

    fn summarize_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(CapabilityKey::parse("text/summarize").unwrap(), "Summarize")
            .with_param(ParameterSpec::new("text", ParamKind::String).required())
            .with_param(
                ParameterSpec::new("summary_length", ParamKind::Integer)
                    .with_default(json!(3))
                    .with_bounds(Some(1.0), Some(10.0)),
            )
            .with_return(ReturnSpec::new("summary", ParamKind::String))
    }

    fn converter(dir: &std::path::Path) -> Converter {
        Converter::new(dir, true)
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_applied_and_bounds_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = summarize_descriptor();

        let wire = conv.validate_wire(&desc, &object(json!({"text": "a"}))).unwrap();
        assert_eq!(wire["summary_length"], 3);

        let err = conv
            .validate_wire(&desc, &object(json!({"text": "a", "summary_length": 11})))
            .unwrap_err();
        assert_eq!(err.field, "summary_length");
        assert_eq!(err.constraint, "must be <= 10");

        let err = conv.validate_wire(&desc, &object(json!({}))).unwrap_err();
        assert_eq!(err, ValidationError::new("text", "is required"));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let err = conv
            .validate_wire(&summarize_descriptor(), &object(json!({"text": 5})))
            .unwrap_err();
        assert_eq!(err.field, "text");
        assert_eq!(err.constraint, "must be a string");
    }

    #[test]
    fn test_enumeration_choices() {
        let spec = ParameterSpec::new("mode", ParamKind::Enumeration)
            .with_choices(vec!["fast".into(), "slow".into()]);
        assert!(check_value(&spec, &json!("fast"), "mode").is_ok());
        let err = check_value(&spec, &json!("medium"), "mode").unwrap_err();
        assert_eq!(err.constraint, "must be one of [fast, slow]");
    }

    #[test]
    fn test_nested_object_and_list_paths() {
        let spec = ParameterSpec::new("options", ParamKind::Object).with_fields(vec![
            ParameterSpec::new("depth", ParamKind::Integer).with_bounds(Some(0.0), Some(3.0)),
            ParameterSpec::new("tags", ParamKind::List)
                .with_items(ParameterSpec::new("tag", ParamKind::String)),
        ]);
        let err = check_value(&spec, &json!({"depth": 9}), "options").unwrap_err();
        assert_eq!(err.field, "options.depth");

        let err = check_value(&spec, &json!({"tags": ["a", 2]}), "options").unwrap_err();
        assert_eq!(err.field, "options.tags[1]");
        assert_eq!(err.constraint, "must be a string");
    }

    #[test]
    fn test_scalar_round_trip_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("echo/all").unwrap(), "Echo")
            .with_param(ParameterSpec::new("s", ParamKind::String))
            .with_param(ParameterSpec::new("i", ParamKind::Integer))
            .with_param(ParameterSpec::new("f", ParamKind::Float))
            .with_param(ParameterSpec::new("b", ParamKind::Boolean))
            .with_param(ParameterSpec::new("o", ParamKind::Object))
            .with_return(ReturnSpec::new("s", ParamKind::String))
            .with_return(ReturnSpec::new("i", ParamKind::Integer))
            .with_return(ReturnSpec::new("f", ParamKind::Float))
            .with_return(ReturnSpec::new("b", ParamKind::Boolean))
            .with_return(ReturnSpec::new("o", ParamKind::Object));
        let wire = json!({"s": "x", "i": -4, "f": 2.5, "b": true, "o": {"k": [1, 2]}});

        let (args, _scope) = conv.decode(&desc, &object(wire.clone())).unwrap();
        let outputs: Vec<NativeValue> = args.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(conv.encode(&desc, outputs).unwrap(), wire);
    }

    #[test]
    fn test_image_round_trip_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("img/id").unwrap(), "Id")
            .with_param(ParameterSpec::new("image", ParamKind::Image).required())
            .with_return(ReturnSpec::new("image", ParamKind::Image));

        let original = PixelBuffer::new(2, 3, 3, (0..18).collect()).unwrap();
        let png = media::encode_png(&original).unwrap();
        let wire = json!({"image": media::encode_data_uri("image/png", &png)});

        let (args, _scope) = conv.decode(&desc, &object(wire)).unwrap();
        let decoded = args.image("image").unwrap().clone();
        assert_eq!(decoded, original);

        let out = conv.encode(&desc, vec![NativeValue::Image(decoded)]).unwrap();
        let text = out["image"].as_str().unwrap();
        assert!(text.starts_with("data:image/png;base64,"));
        let back = media::decode_image(&media::decode_payload(text).unwrap().bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_invalid_image_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("img/id").unwrap(), "Id")
            .with_param(ParameterSpec::new("image", ParamKind::Image).required());
        let err = conv
            .decode(&desc, &object(json!({"image": "aGVsbG8="})))
            .unwrap_err();
        assert!(matches!(err, NexusError::Validation(ref v) if v.field == "image"));
    }

    #[test]
    fn test_file_params_live_in_scope() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("vid/inspect").unwrap(), "Inspect")
            .with_param(ParameterSpec::new("video", ParamKind::Video).required());
        let wire = json!({"video": media::encode_data_uri("video/mp4", b"\0\0\0\x18ftypmp42")});

        let (args, scope) = conv.decode(&desc, &object(wire)).unwrap();
        let path = args.path("video").unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "mp4");
        assert!(path.exists());
        drop(scope);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_output_encoded_with_mime() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("doc/make").unwrap(), "Make")
            .with_return(ReturnSpec::new("report", ParamKind::File));
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let out = conv.encode(&desc, vec![NativeValue::Path(path)]).unwrap();
        assert_eq!(out["report"], media::encode_data_uri("application/pdf", b"%PDF-1.4"));
    }

    #[test]
    fn test_output_arity_mismatch_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let err = conv
            .encode(&summarize_descriptor(), vec![NativeValue::from("a"), NativeValue::from("b")])
            .unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn test_undeclared_returns_use_positional_names() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let desc = CapabilityDescriptor::new(CapabilityKey::parse("a/b").unwrap(), "B");
        let out = conv
            .encode(&desc, vec![NativeValue::Integer(1), NativeValue::Bool(false)])
            .unwrap();
        assert_eq!(out, json!({"output_0": 1, "output_1": false}));
    }
}
