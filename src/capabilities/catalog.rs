//! Handler catalog: what a manifest's `handler:` and `process:` entries bind to.
//!
//! Native handlers are compiled into the server and registered by name before
//! the first load. Process-backed capabilities spawn a child per call; the
//! child reads the arguments as one JSON object on stdin and writes its
//! outputs as JSON on stdout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::capability::{Arguments, Capability, CapabilityError, SharedCapability};
use super::error::LoadError;
use super::manifest::{Binding, ProcessDef};
use crate::convert::media::{encode_data_uri, encode_png};
use crate::convert::NativeValue;

/// Named native handlers available to manifests.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, SharedCapability>,
}

impl HandlerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the handlers shipped with the server.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        crate::builtin::register(&mut catalog);
        catalog
    }

    /// Register (or replace) a handler.
    pub fn register(&mut self, name: impl Into<String>, handler: SharedCapability) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            log::warn!("Handler '{}' replaced in catalog", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedCapability> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Produce the callable for a manifest binding.
    pub fn bind(
        &self,
        key: &str,
        binding: Binding<'_>,
        bundle_dir: &Path,
        return_names: Vec<String>,
    ) -> Result<SharedCapability, LoadError> {
        match binding {
            Binding::Handler(name) => self.get(name).ok_or_else(|| LoadError::UnknownHandler {
                key: key.to_string(),
                handler: name.to_string(),
            }),
            Binding::Process(def) => Ok(Arc::new(ProcessCapability::new(
                def.clone(),
                bundle_dir.to_path_buf(),
                return_names,
            ))),
        }
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("handlers", &self.names())
            .finish()
    }
}

// ============================================================================
// ProcessCapability
// ============================================================================

/// Runs an external command once per call.
///
/// The child is killed if the call future is dropped, so a timed-out call
/// does not leave the process running.
#[derive(Debug, Clone)]
pub struct ProcessCapability {
    def: ProcessDef,
    working_dir: PathBuf,
    return_names: Vec<String>,
}

impl ProcessCapability {
    pub fn new(def: ProcessDef, working_dir: PathBuf, return_names: Vec<String>) -> Self {
        Self {
            def,
            working_dir,
            return_names,
        }
    }

    fn parse_outputs(&self, stdout: &[u8]) -> Result<Vec<NativeValue>, CapabilityError> {
        let value: Value = serde_json::from_slice(stdout).map_err(|e| {
            CapabilityError::failed(format!("process output is not JSON: {}", e))
        })?;
        let outputs = match value {
            Value::Array(items) => items.into_iter().map(from_json).collect(),
            Value::Object(mut map) if !self.return_names.is_empty() => self
                .return_names
                .iter()
                .map(|name| {
                    map.remove(name).map(from_json).ok_or_else(|| {
                        CapabilityError::failed(format!("process output lacks '{}'", name))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![from_json(other)],
        };
        Ok(outputs)
    }
}

#[async_trait]
impl Capability for ProcessCapability {
    async fn call(&self, args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
        let input = serde_json::to_vec(&args_to_json(&args)?)
            .map_err(|e| CapabilityError::failed(e.to_string()))?;

        let mut child = Command::new(&self.def.command)
            .args(&self.def.args)
            .envs(&self.def.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::failed(format!(
                "'{}' exited with {}: {}",
                self.def.command,
                output.status,
                stderr.trim()
            )));
        }
        self.parse_outputs(&output.stdout)
    }
}

/// JSON form of native arguments: images as PNG data URIs, files as paths.
pub fn args_to_json(args: &Arguments) -> Result<Value, CapabilityError> {
    let mut map = Map::new();
    for (name, value) in args.iter() {
        let json = match value {
            NativeValue::Image(buffer) => {
                let png = encode_png(buffer).map_err(|e| CapabilityError::failed(e.to_string()))?;
                Value::String(encode_data_uri("image/png", &png))
            }
            NativeValue::Path(path) => Value::String(path.display().to_string()),
            other => other.scalar_json().unwrap_or(Value::Null),
        };
        map.insert(name.to_string(), json);
    }
    Ok(Value::Object(map))
}

fn from_json(value: Value) -> NativeValue {
    match value {
        Value::Null => NativeValue::Null,
        Value::Bool(b) => NativeValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => NativeValue::Integer(i),
            None => NativeValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => NativeValue::String(s),
        other => NativeValue::Json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::capability::FnCapability;

    fn echo_handler() -> SharedCapability {
        FnCapability::new(1, |args: Arguments| async move {
            Ok(vec![NativeValue::from(args.text("text")?.to_string())])
        })
        .shared()
    }

    #[test]
    fn test_register_and_bind_handler() {
        let mut catalog = HandlerCatalog::new();
        catalog.register("echo", echo_handler());
        assert_eq!(catalog.names(), vec!["echo"]);

        let bound = catalog
            .bind("a/b", Binding::Handler("echo"), Path::new("."), vec![])
            .unwrap();
        assert_eq!(bound.declared_outputs(), Some(1));

        let err = catalog
            .bind("a/b", Binding::Handler("missing"), Path::new("."), vec![])
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::UnknownHandler { handler, .. } if handler == "missing"));
    }

    #[test]
    fn test_builtins_registered() {
        let catalog = HandlerCatalog::with_builtins();
        assert!(catalog.get("text.summarize").is_some());
        assert!(catalog.get("text.analyze").is_some());
        assert!(catalog.get("image.grayscale").is_some());
    }

    #[test]
    fn test_parse_outputs_by_name_and_position() {
        let cap = ProcessCapability::new(
            ProcessDef {
                command: "true".into(),
                args: vec![],
                env: Default::default(),
            },
            PathBuf::from("."),
            vec!["a".into(), "b".into()],
        );
        let named = cap.parse_outputs(br#"{"b": 2, "a": "x"}"#).unwrap();
        assert_eq!(named, vec![NativeValue::from("x"), NativeValue::Integer(2)]);

        let positional = cap.parse_outputs(b"[1.5, true]").unwrap();
        assert_eq!(positional, vec![NativeValue::Float(1.5), NativeValue::Bool(true)]);

        assert!(cap.parse_outputs(br#"{"a": 1}"#).is_err());
        assert!(cap.parse_outputs(b"not json").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_capability_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cap = ProcessCapability::new(
            ProcessDef {
                command: "sh".into(),
                args: vec!["-c".into(), "cat > /dev/null; echo '{\"out\": \"done\"}'".into()],
                env: Default::default(),
            },
            dir.path().to_path_buf(),
            vec!["out".into()],
        );
        let out = cap.call(Arguments::new().with("x", 1i64)).await.unwrap();
        assert_eq!(out, vec![NativeValue::from("done")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cap = ProcessCapability::new(
            ProcessDef {
                command: "sh".into(),
                args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
                env: Default::default(),
            },
            dir.path().to_path_buf(),
            vec![],
        );
        let err = cap.call(Arguments::new()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
