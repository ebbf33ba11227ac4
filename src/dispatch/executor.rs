//! One bounded execution of a bound capability.
//!
//! Shared by direct calls and queue workers: convert the arguments, run the
//! callable under the deadline, convert the outputs. Panics inside a handler
//! are caught and reported like any other handler failure.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value};

use crate::capabilities::BoundCapability;
use crate::convert::Converter;
use crate::error::{ErrorEnvelope, NexusError};

#[derive(Debug, Clone)]
pub struct Executor {
    converter: Converter,
    timeout: Duration,
    expose_details: bool,
}

impl Executor {
    pub fn new(converter: Converter, timeout: Duration, expose_details: bool) -> Self {
        Self {
            converter,
            timeout,
            expose_details,
        }
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wire envelope for an error, honouring the detail-exposure setting.
    pub fn envelope(&self, err: &NexusError) -> ErrorEnvelope {
        err.envelope(self.expose_details)
    }

    /// Run `bound` with raw wire arguments and return the wire result.
    ///
    /// The deadline covers the callable only. When it passes, the call
    /// future is dropped; temp files are removed when the conversion scope
    /// goes out of scope here.
    pub async fn execute(
        &self,
        bound: &BoundCapability,
        raw: &Map<String, Value>,
    ) -> Result<Value, NexusError> {
        let descriptor = bound.descriptor();
        let (args, _scope) = self.converter.decode(descriptor, raw)?;

        let call = AssertUnwindSafe(bound.callable().call(args)).catch_unwind();
        let outputs = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                log::warn!(
                    "{} exceeded the {:?} deadline",
                    descriptor.key,
                    self.timeout
                );
                return Err(NexusError::ExecutionTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                log::error!("{} panicked: {}", descriptor.key, message);
                return Err(NexusError::Execution {
                    message: format!("handler panicked: {}", message),
                });
            }
            Ok(Ok(Err(e))) => {
                log::error!("{} failed: {}", descriptor.key, e);
                return Err(NexusError::Execution {
                    message: e.to_string(),
                });
            }
            Ok(Ok(Ok(outputs))) => outputs,
        };

        self.converter.encode(descriptor, outputs).map_err(|e| {
            log::error!("{} produced unusable output: {}", descriptor.key, e);
            e
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
