//! # Job Queue
//!
//! Queued-mode calls become [`Job`]s. A job moves
//! `queued → running → {completed, failed, timed_out}` and never leaves a
//! terminal state. The [`JobQueue`] owns the worker pool; the [`Ledger`]
//! keeps every job on disk so a restart can pick up where the last process
//! stopped.

pub mod job;
pub mod job_queue;
pub mod ledger;

pub use job::{InvalidTransition, Job, JobStatus, JobSummary, JobView};
pub use job_queue::{parse_job_id, JobQueue, QueueSettings, RecoveryReport};
pub use ledger::{Ledger, LedgerLoad};
