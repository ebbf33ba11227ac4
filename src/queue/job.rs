//! Job record and its status machine.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorEnvelope;

/// Lifecycle state of a job.
///
/// `queued → running → {completed, failed, timed_out}`. A queued job may
/// also fail directly when its capability no longer exists at claim time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::TimedOut)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One queued-mode call, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Capability key (`bundle/name`).
    pub capability: String,
    /// Credential identity of the submitter.
    pub owner: String,
    /// Validated wire arguments with defaults applied.
    pub args: Map<String, Value>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of times a worker has claimed this job.
    #[serde(default)]
    pub attempts: u32,
    /// Registry generation of the most recent claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl Job {
    pub fn new(capability: impl Into<String>, owner: impl Into<String>, args: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            capability: capability.into(),
            owner: owner.into(),
            args,
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
            attempts: 0,
            generation: None,
        }
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// A worker claimed the job.
    pub fn start(&mut self, generation: u64, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Running, now)?;
        self.attempts += 1;
        self.generation = Some(generation);
        Ok(())
    }

    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed, now)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: ErrorEnvelope, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn time_out(&mut self, error: ErrorEnvelope, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::TimedOut, now)?;
        self.error = Some(error);
        Ok(())
    }

    /// Put a job found `running` in the ledger back to `queued`.
    ///
    /// Only startup recovery calls this: the process that held the job is
    /// gone, so no worker owns it.
    pub fn requeue_for_resume(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Running {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Queued,
            });
        }
        self.status = JobStatus::Queued;
        self.updated_at = now;
        Ok(())
    }

    /// Terminal and finished more than `retention` ago.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: ChronoDuration) -> bool {
        match (self.status.is_terminal(), self.finished_at) {
            (true, Some(finished)) => now - finished > retention,
            _ => false,
        }
    }

    /// What a poll returns for this job.
    pub fn view(&self) -> JobView {
        match self.status {
            JobStatus::Queued | JobStatus::Running => JobView::Pending { queue_id: self.id },
            JobStatus::Completed => JobView::Completed(self.result.clone().unwrap_or(Value::Null)),
            JobStatus::Failed | JobStatus::TimedOut => JobView::Failed(
                self.error.clone().unwrap_or_else(|| ErrorEnvelope {
                    error: 500,
                    description: "job failed".to_string(),
                    details: json!({}),
                }),
            ),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            queue_id: self.id,
            capability: self.capability.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            attempts: self.attempts,
        }
    }
}

/// Poll result.
#[derive(Debug, Clone, PartialEq)]
pub enum JobView {
    /// Still queued or running; echoes the id.
    Pending { queue_id: Uuid },
    Completed(Value),
    Failed(ErrorEnvelope),
}

impl JobView {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// HTTP status to answer a poll with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Failed(envelope) => envelope.error,
            _ => 200,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Pending { queue_id } => json!({ "queue_id": queue_id }),
            Self::Completed(result) => result.clone(),
            Self::Failed(envelope) => envelope.to_value(),
        }
    }
}

/// Listing entry for an owner's queue view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub queue_id: Uuid,
    pub capability: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: u16) -> ErrorEnvelope {
        ErrorEnvelope {
            error: code,
            description: "x".into(),
            details: json!({}),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut job = Job::new("text/summarize", "key-1", Map::new());
        assert!(job.view().is_pending());
        let now = Utc::now();
        job.start(3, now).unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.generation, Some(3));
        job.complete(json!({"summary": "Alpha."}), now).unwrap();
        assert_eq!(job.finished_at, Some(now));
        assert_eq!(job.view().to_value(), json!({"summary": "Alpha."}));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new("a/b", "o", Map::new());
        let now = Utc::now();
        job.start(1, now).unwrap();
        job.time_out(envelope(504), now).unwrap();
        assert!(job.complete(json!({}), now).is_err());
        assert!(job.fail(envelope(500), now).is_err());
        assert!(job.start(1, now).is_err());
        assert!(job.requeue_for_resume(now).is_err());
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.view().status_code(), 504);
    }

    #[test]
    fn test_queued_cannot_complete_without_running() {
        let mut job = Job::new("a/b", "o", Map::new());
        assert_eq!(
            job.complete(json!({}), Utc::now()),
            Err(InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
            })
        );
        assert!(job.fail(envelope(404), Utc::now()).is_ok());
    }

    #[test]
    fn test_requeue_for_resume_keeps_attempts() {
        let mut job = Job::new("a/b", "o", Map::new());
        job.start(1, Utc::now()).unwrap();
        job.requeue_for_resume(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_expiry_uses_finished_at() {
        let mut job = Job::new("a/b", "o", Map::new());
        let retention = ChronoDuration::seconds(60);
        let t0 = Utc::now();
        assert!(!job.is_expired(t0 + ChronoDuration::days(1), retention));
        job.start(1, t0).unwrap();
        job.complete(json!({}), t0).unwrap();
        assert!(!job.is_expired(t0 + ChronoDuration::seconds(30), retention));
        assert!(job.is_expired(t0 + ChronoDuration::seconds(61), retention));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(JobStatus::TimedOut).unwrap(), "timed_out");
    }
}
