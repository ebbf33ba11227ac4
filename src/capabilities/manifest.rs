//! `bundle.yaml` manifest schema.
//!
//! Example:
//! ```yaml
//! bundle:
//!   name: text
//!   requirements: ["nltk"]
//!   capabilities:
//!     - name: summarize
//!       label: Text Summarizer
//!       execution_mode: queued
//!       handler: text.summarize
//!       params:
//!         - { name: text, kind: string, required: true, multiline: true }
//!         - { name: summary_length, kind: integer, default: 3, min: 1, max: 10 }
//!       returns:
//!         - { name: summary, kind: string }
//! ```
//!
//! Kinds are kept as plain strings here so an unknown tag surfaces as a
//! [`DescriptorError::UnknownKind`] naming the field, instead of a generic
//! YAML error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::descriptor::{
    CapabilityDescriptor, CapabilityKey, ExecutionMode, ParamKind, ParameterSpec, ReturnSpec,
};
use super::error::{DescriptorError, LoadError};

/// File names recognised as bundle manifests.
pub const MANIFEST_FILES: [&str; 2] = ["bundle.yaml", "bundle.yml"];

/// Top-level manifest; the `bundle:` key wraps the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle: BundleDef,
}

impl BundleManifest {
    /// Parse a manifest from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Parse a manifest from a file on disk.
    pub fn from_yaml_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }
}

/// The bundle payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDef {
    /// Bundle name; defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,

    /// Third-party packages handed to the dependency resolver before import.
    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<CapabilityDef>,
}

/// One capability in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDef {
    pub name: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Native handler name looked up in the catalog.
    #[serde(default)]
    pub handler: Option<String>,

    /// External command run once per call.
    #[serde(default)]
    pub process: Option<ProcessDef>,

    #[serde(default)]
    pub params: Vec<ParamDef>,

    #[serde(default)]
    pub returns: Vec<ReturnDef>,
}

/// A process-backed binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDef {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// What a capability is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding<'a> {
    Handler(&'a str),
    Process(&'a ProcessDef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, alias = "values")]
    pub choices: Vec<String>,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<ParamDef>,
    #[serde(default)]
    pub items: Option<Box<ParamDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnDef {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub mime: Option<String>,
}

impl CapabilityDef {
    /// Build the descriptor for this capability within `bundle`.
    pub fn to_descriptor(&self, bundle: &str) -> Result<CapabilityDescriptor, DescriptorError> {
        let key = CapabilityKey::new(bundle, &self.name)?;
        let params = self
            .params
            .iter()
            .map(|p| p.to_spec(&key))
            .collect::<Result<Vec<_>, _>>()?;
        let returns = self
            .returns
            .iter()
            .map(|r| {
                Ok(ReturnSpec {
                    name: r.name.clone(),
                    kind: parse_kind(&key, &r.name, &r.kind)?,
                    mime: r.mime.clone(),
                })
            })
            .collect::<Result<Vec<_>, DescriptorError>>()?;

        let label = self.label.clone().unwrap_or_else(|| self.name.clone());
        let mut descriptor = CapabilityDescriptor::new(key, label).with_mode(self.execution_mode);
        if let Some(category) = &self.category {
            descriptor = descriptor.with_category(category.clone());
        }
        if let Some(description) = &self.description {
            descriptor = descriptor.with_description(description.clone());
        }
        descriptor.params = params;
        descriptor.returns = returns;
        Ok(descriptor)
    }

    /// The handler or process this capability binds to.
    pub fn binding(&self, key: &CapabilityKey) -> Result<Binding<'_>, LoadError> {
        match (&self.handler, &self.process) {
            (Some(handler), None) => Ok(Binding::Handler(handler)),
            (None, Some(process)) => Ok(Binding::Process(process)),
            _ => Err(LoadError::AmbiguousBinding(key.to_string())),
        }
    }
}

impl ParamDef {
    fn to_spec(&self, key: &CapabilityKey) -> Result<ParameterSpec, DescriptorError> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.to_spec(key))
            .collect::<Result<Vec<_>, _>>()?;
        let items = match &self.items {
            Some(item) => Some(Box::new(item.to_spec(key)?)),
            None => None,
        };
        Ok(ParameterSpec {
            name: self.name.clone(),
            kind: parse_kind(key, &self.name, &self.kind)?,
            required: self.required,
            default: self.default.clone(),
            min: self.min,
            max: self.max,
            choices: self.choices.clone(),
            multiline: self.multiline,
            description: self.description.clone(),
            fields,
            items,
        })
    }
}

fn parse_kind(key: &CapabilityKey, field: &str, tag: &str) -> Result<ParamKind, DescriptorError> {
    tag.parse().map_err(|_| DescriptorError::UnknownKind {
        key: key.to_string(),
        field: field.to_string(),
        kind: tag.to_string(),
    })
}
