//! Error taxonomy shared by every call path.
//!
//! [`NexusError`] is the one boundary all per-call failures funnel through,
//! whether the capability runs directly or as a queued job. Adapters never
//! build their own error shapes: they turn a `NexusError` into an
//! [`ErrorEnvelope`] and serialize that.
//!
//! Load-time failures (`DescriptorError`, `LoadError`) live in
//! [`crate::capabilities::error`] because they are recovered locally by the
//! loader and only surface through a `LoadReport`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::capabilities::error::DescriptorError;

/// Description returned to callers when execution detail is withheld.
pub const SANITIZED_EXECUTION_MESSAGE: &str = "capability execution failed";

/// A caller-supplied value violated a parameter constraint.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("field '{field}' {constraint}")]
pub struct ValidationError {
    /// Parameter name (dotted path for nested values, e.g. `options.depth`).
    pub field: String,
    /// Human-readable constraint that failed (e.g. `must be <= 10`).
    pub constraint: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

/// Errors surfaced to callers of the dispatcher and the job queue.
#[derive(Debug, Error)]
pub enum NexusError {
    /// The request itself is malformed (not an object, missing `queue_id`, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unknown API key, or access to another owner's job.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No capability with this key exists in the current generation.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// No job with this id exists in the ledger.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Caller input failed conversion or validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The bounded queue is at capacity.
    #[error("Queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    /// Execution exceeded `process_timeout_seconds`.
    #[error("Execution timed out after {seconds}s")]
    ExecutionTimeout { seconds: u64 },

    /// The capability itself failed. The message is internal detail.
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// Reading or writing the job ledger failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A capability definition is malformed.
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
}

impl NexusError {
    /// Numeric code used as HTTP status and as the envelope `error` field.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::UnknownCapability(_) | Self::JobNotFound(_) => 404,
            Self::Validation(_) => 422,
            Self::QueueFull { .. } => 503,
            Self::ExecutionTimeout { .. } => 504,
            Self::Execution { .. } | Self::Persistence(_) | Self::Descriptor(_) => 500,
        }
    }

    /// Build the wire envelope for this error.
    ///
    /// Execution detail is replaced by [`SANITIZED_EXECUTION_MESSAGE`] unless
    /// `expose_details` is set; the full message belongs in server logs.
    pub fn envelope(&self, expose_details: bool) -> ErrorEnvelope {
        let (description, details) = match self {
            Self::Validation(err) => (
                self.to_string(),
                json!({ "field": err.field, "constraint": err.constraint }),
            ),
            Self::QueueFull { capacity } => (self.to_string(), json!({ "capacity": capacity })),
            Self::ExecutionTimeout { seconds } => {
                (self.to_string(), json!({ "timeout_seconds": seconds }))
            }
            Self::Execution { message } if expose_details => {
                (SANITIZED_EXECUTION_MESSAGE.to_string(), json!({ "message": message }))
            }
            Self::Execution { .. } => (SANITIZED_EXECUTION_MESSAGE.to_string(), json!({})),
            Self::Persistence(_) if !expose_details => {
                ("Persistence error".to_string(), json!({}))
            }
            _ => (self.to_string(), json!({})),
        };
        ErrorEnvelope {
            error: self.code(),
            description,
            details,
        }
    }
}

/// Error payload shared by direct responses, poll results and MCP tool errors.
///
/// Wire shape: `{"error": <code>, "description": <string>, "details": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: u16,
    pub description: String,
    #[serde(default = "empty_details")]
    pub details: Value,
}

fn empty_details() -> Value {
    json!({})
}

impl ErrorEnvelope {
    /// Serialize the envelope into a JSON value.
    pub fn to_value(&self) -> Value {
        json!({
            "error": self.error,
            "description": self.description,
            "details": self.details,
        })
    }
}
