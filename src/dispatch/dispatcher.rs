//! Single entry point for calls from every protocol adapter.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::executor::Executor;
use crate::capabilities::{CapabilityRegistry, ExecutionMode};
use crate::error::NexusError;
use crate::queue::JobQueue;

/// Handle returned for an accepted queued-mode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    #[serde(rename = "queue_id")]
    pub job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Result object of a direct-mode call.
    Direct(Value),
    Queued(JobHandle),
}

impl DispatchOutcome {
    /// Response body: the result object, or `{"queue_id": ...}`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Direct(result) => result.clone(),
            Self::Queued(handle) => json!({ "queue_id": handle.job_id }),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: CapabilityRegistry,
    executor: Arc<Executor>,
    queue: JobQueue,
}

impl Dispatcher {
    pub fn new(registry: CapabilityRegistry, executor: Arc<Executor>, queue: JobQueue) -> Self {
        Self {
            registry,
            executor,
            queue,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Route one call by the capability's execution mode.
    ///
    /// Direct calls run inline on the caller's task under the deadline.
    /// Queued calls are validated first, so bad input never creates a job,
    /// and then enqueued without waiting for capacity.
    pub async fn invoke(
        &self,
        key: &str,
        raw: Value,
        owner: &str,
    ) -> Result<DispatchOutcome, NexusError> {
        let raw = match raw {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(NexusError::InvalidInput(format!(
                    "arguments must be a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        let bound = self.registry.bind(key)?;
        match bound.descriptor().mode {
            ExecutionMode::Direct => {
                log::debug!("Direct call {} for {}", key, owner);
                let result = self.executor.execute(&bound, &raw).await?;
                Ok(DispatchOutcome::Direct(result))
            }
            ExecutionMode::Queued => {
                let normalized = self
                    .executor
                    .converter()
                    .validate_wire(bound.descriptor(), &raw)?;
                let job_id = self.queue.submit(bound, normalized, owner).await?;
                Ok(DispatchOutcome::Queued(JobHandle { job_id }))
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("queue", &self.queue)
            .finish()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
