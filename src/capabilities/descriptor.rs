//! Capability descriptor model: the typed schema of one operation.
//!
//! A [`CapabilityDescriptor`] is pure data: key, labels, ordered parameter and
//! return specs, and the execution mode. It carries no behaviour; the bound
//! callable lives next to it in a registry generation. Descriptors are built
//! once by the loader and then shared behind `Arc`, so nothing mutates them
//! after construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DescriptorError;

// ============================================================================
// Keys
// ============================================================================

/// Unique capability key: `bundle/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityKey(String);

impl CapabilityKey {
    /// Build a key from its two segments, validating both.
    pub fn new(bundle: &str, name: &str) -> Result<Self, DescriptorError> {
        validate_segment(bundle)?;
        validate_segment(name)?;
        Ok(Self(format!("{}/{}", bundle, name)))
    }

    /// Parse a `bundle/name` string.
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        match raw.split_once('/') {
            Some((bundle, name)) => Self::new(bundle, name),
            None => Err(DescriptorError::InvalidName(raw.to_string())),
        }
    }

    /// Bundle segment.
    pub fn bundle(&self) -> &str {
        self.0.split_once('/').map(|(b, _)| b).unwrap_or(&self.0)
    }

    /// Capability-name segment.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check one key segment (bundle name or capability name).
pub fn validate_segment(segment: &str) -> Result<(), DescriptorError> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DescriptorError::InvalidName(segment.to_string()))
    }
}

// ============================================================================
// Kinds and modes
// ============================================================================

/// Value kind of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Base64 on the wire, pixel buffer natively.
    Image,
    /// Base64 on the wire, scoped temp file natively.
    Video,
    /// Base64 on the wire, scoped temp file natively.
    File,
    /// JSON object, optionally validated against nested fields.
    Object,
    /// JSON array, optionally validated against an item spec.
    List,
    /// String restricted to a fixed set of values.
    Enumeration,
}

impl ParamKind {
    /// Kinds whose wire form is a base64 payload.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::File)
    }

    /// Canonical tag as used in manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::Object => "object",
            Self::List => "list",
            Self::Enumeration => "enumeration",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKindTag(pub String);

impl FromStr for ParamKind {
    type Err = UnknownKindTag;

    /// Accepts the canonical tags plus the upper-case spellings bundle authors
    /// tend to carry over (`STRING`, `INT`, `DICT`, ...).
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Self::String,
            "integer" | "int" => Self::Integer,
            "float" | "number" => Self::Float,
            "boolean" | "bool" => Self::Boolean,
            "image" => Self::Image,
            "video" => Self::Video,
            "file" => Self::File,
            "object" | "structured-object" | "structured_object" | "dict" => Self::Object,
            "list" | "array" => Self::List,
            "enumeration" | "enum" => Self::Enumeration,
            _ => return Err(UnknownKindTag(tag.to_string())),
        };
        Ok(kind)
    }
}

/// How a capability is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Synchronous; the result is returned in the same call.
    #[default]
    Direct,
    /// Asynchronous; the caller gets a job handle and polls.
    Queued,
}

// ============================================================================
// Parameter and return specs
// ============================================================================

/// One declared input of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values for `enumeration`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// UI hint for long text; no effect on validation.
    #[serde(default)]
    pub multiline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nested fields for `object`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ParameterSpec>,
    /// Item spec for `list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSpec>>,
}

impl ParameterSpec {
    /// A bare spec with no constraints.
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            choices: Vec::new(),
            multiline: false,
            description: None,
            fields: Vec::new(),
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_fields(mut self, fields: Vec<ParameterSpec>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_items(mut self, items: ParameterSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn multiline(mut self) -> Self {
        self.multiline = true;
        self
    }
}

/// One declared output of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSpec {
    pub name: String,
    pub kind: ParamKind,
    /// MIME type used for the data-URI header of media outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl ReturnSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mime: None,
        }
    }
}

// ============================================================================
// CapabilityDescriptor
// ============================================================================

/// Immutable schema of one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub key: CapabilityKey,
    /// Human label (e.g. "Text Summarizer").
    pub label: String,
    /// Category tag used for grouping in docs and tool listings.
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub params: Vec<ParameterSpec>,
    pub returns: Vec<ReturnSpec>,
    pub mode: ExecutionMode,
}

impl CapabilityDescriptor {
    /// Start a descriptor with no parameters or returns in direct mode.
    pub fn new(key: CapabilityKey, label: impl Into<String>) -> Self {
        Self {
            category: key.bundle().to_string(),
            key,
            label: label.into(),
            description: None,
            params: Vec::new(),
            returns: Vec::new(),
            mode: ExecutionMode::Direct,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_param(mut self, param: ParameterSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_return(mut self, ret: ReturnSpec) -> Self {
        self.returns.push(ret);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Look up a parameter spec by name.
    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_queued(&self) -> bool {
        self.mode == ExecutionMode::Queued
    }

    /// Name used for the `index`th return value.
    pub fn return_name(&self, index: usize) -> String {
        self.returns
            .get(index)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| format!("output_{}", index))
    }
}
