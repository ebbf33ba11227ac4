//! The callable side of a capability.
//!
//! A descriptor says what a capability accepts and returns; a [`Capability`]
//! implementation does the work. The two are paired by the loader and stored
//! together in a registry generation. Callables never see wire values: the
//! converter hands them [`Arguments`] of [`NativeValue`]s and turns their
//! positional outputs back into a named result object.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::convert::{NativeValue, PixelBuffer};

/// Failure raised by a callable. Always surfaced to callers as an execution
/// error; the message is server-side detail.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("missing argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' is not a {expected}")]
    WrongType { name: String, expected: &'static str },

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CapabilityError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Converted arguments of one call, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, NativeValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: NativeValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<NativeValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&NativeValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NativeValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    fn require(&self, name: &str) -> Result<&NativeValue, CapabilityError> {
        self.get(name)
            .ok_or_else(|| CapabilityError::MissingArgument(name.to_string()))
    }

    fn wrong(name: &str, expected: &'static str) -> CapabilityError {
        CapabilityError::WrongType {
            name: name.to_string(),
            expected,
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, CapabilityError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| Self::wrong(name, "string"))
    }

    pub fn integer(&self, name: &str) -> Result<i64, CapabilityError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| Self::wrong(name, "integer"))
    }

    pub fn float(&self, name: &str) -> Result<f64, CapabilityError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| Self::wrong(name, "float"))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, CapabilityError> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| Self::wrong(name, "boolean"))
    }

    pub fn image(&self, name: &str) -> Result<&PixelBuffer, CapabilityError> {
        match self.require(name)? {
            NativeValue::Image(buffer) => Ok(buffer),
            _ => Err(Self::wrong(name, "image")),
        }
    }

    pub fn path(&self, name: &str) -> Result<&Path, CapabilityError> {
        match self.require(name)? {
            NativeValue::Path(path) => Ok(path),
            _ => Err(Self::wrong(name, "file path")),
        }
    }

    pub fn json(&self, name: &str) -> Result<&Value, CapabilityError> {
        match self.require(name)? {
            NativeValue::Json(value) => Ok(value),
            _ => Err(Self::wrong(name, "structured value")),
        }
    }
}

/// A bound callable.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Number of positional outputs, when the callable knows it statically.
    ///
    /// Used at load time to reject descriptors whose return list has a
    /// different length. `None` skips the check; the converter still rejects
    /// a mismatch per call.
    fn declared_outputs(&self) -> Option<usize> {
        None
    }

    /// Run the capability.
    async fn call(&self, args: Arguments) -> Result<Vec<NativeValue>, CapabilityError>;
}

/// Shared handle to a callable; cloned into in-flight calls.
pub type SharedCapability = Arc<dyn Capability>;

type CallFn =
    dyn Fn(Arguments) -> BoxFuture<'static, Result<Vec<NativeValue>, CapabilityError>> + Send + Sync;

/// A capability backed by a closure.
pub struct FnCapability {
    outputs: Option<usize>,
    call: Box<CallFn>,
}

impl FnCapability {
    /// Wrap an async closure producing `outputs` positional values.
    pub fn new<F, Fut>(outputs: usize, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<NativeValue>, CapabilityError>> + Send + 'static,
    {
        Self {
            outputs: Some(outputs),
            call: Box::new(move |args| Box::pin(f(args))),
        }
    }

    /// Wrap a synchronous closure. It runs on the blocking pool so CPU-bound
    /// handlers do not stall the runtime.
    pub fn blocking<F>(outputs: usize, f: F) -> Self
    where
        F: Fn(Arguments) -> Result<Vec<NativeValue>, CapabilityError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(outputs, move |args| {
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| CapabilityError::failed(format!("handler task failed: {}", e)))?
            }
        })
    }

    pub fn shared(self) -> SharedCapability {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn declared_outputs(&self) -> Option<usize> {
        self.outputs
    }

    async fn call(&self, args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
        (self.call)(args).await
    }
}
