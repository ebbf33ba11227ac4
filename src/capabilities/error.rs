//! Load-time errors for capability bundles.

use thiserror::Error;

/// A capability definition is malformed.
///
/// Raised by descriptor validation; a bundle containing such a descriptor is
/// excluded from the generation being built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Name is empty or contains characters not allowed in a key segment.
    #[error("invalid name '{0}' (allowed: letters, digits, '_', '-', '.')")]
    InvalidName(String),

    /// Two parameters share a name.
    #[error("capability {key}: duplicate parameter '{name}'")]
    DuplicateParameter { key: String, name: String },

    /// Two return values share a name.
    #[error("capability {key}: duplicate return name '{name}'")]
    DuplicateReturn { key: String, name: String },

    /// A kind tag is not one of the supported kinds.
    #[error("capability {key}: unknown kind '{kind}' for '{field}'")]
    UnknownKind {
        key: String,
        field: String,
        kind: String,
    },

    /// Declared return values do not match the callable's outputs.
    #[error("capability {key}: declares {declared} return values but callable produces {actual}")]
    ReturnArityMismatch {
        key: String,
        declared: usize,
        actual: usize,
    },

    /// Parameter constraints are contradictory or inapplicable.
    #[error("capability {key}: parameter '{field}': {reason}")]
    InvalidConstraint {
        key: String,
        field: String,
        reason: String,
    },

    /// Another bundle already contributed this key to the generation.
    #[error("duplicate capability key '{0}'")]
    DuplicateKey(String),
}

/// Why a bundle could not be imported.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Manifest file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest is not valid YAML for the bundle schema.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// A capability definition failed validation.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The manifest names a native handler the catalog does not provide.
    #[error("capability {key}: no handler named '{handler}' is registered")]
    UnknownHandler { key: String, handler: String },

    /// A capability must bind exactly one of `handler` or `process`.
    #[error("capability {0}: exactly one of 'handler' or 'process' must be set")]
    AmbiguousBinding(String),

    /// Installing the bundle's requirements failed.
    #[error("dependency installation failed: {0}")]
    Dependency(String),
}
