//! Bounded job queue with a fixed worker pool and a durable ledger.
//!
//! Submissions go to a FIFO of pending ids; `max_threads` workers claim the
//! oldest one and run it through the shared [`Executor`]. Every status
//! transition is written to the [`Ledger`] before it becomes visible: the
//! change is applied to a copy of the job map, the copy is stored, and only
//! then does it replace the in-memory map.
//!
//! Ledger writes are serialized by the async `writer` lock and run on the
//! blocking pool. The `pending` and `jobs` locks are only held to take or
//! commit a snapshot, never across an await or a disk write. Lock order is
//! `writer`, then `pending`, then `jobs`.
//!
//! A job whose transition cannot be stored is failed in memory with a
//! persistence error. The ledger keeps its last durable state, which
//! recovery picks up on the next start.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job::{InvalidTransition, Job, JobStatus, JobSummary, JobView};
use super::ledger::Ledger;
use crate::capabilities::{BoundCapability, CapabilityRegistry};
use crate::convert::clear_temp_dir;
use crate::dispatch::Executor;
use crate::error::NexusError;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_threads: usize,
    pub max_queue_size: usize,
    pub state_file: PathBuf,
    pub temp_dir: PathBuf,
    pub resume_on_startup: bool,
    /// A job found `running` at startup is retried while its attempt count
    /// is below this, then failed.
    pub max_resume_attempts: u32,
    pub clear_temp_on_startup_without_resume: bool,
    /// How long a terminal job stays readable after it finished.
    pub retention: Duration,
    pub eviction_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_threads: 10,
            max_queue_size: 100,
            state_file: PathBuf::from("processing/state.json"),
            temp_dir: PathBuf::from("processing/tmp"),
            resume_on_startup: true,
            max_resume_attempts: 3,
            clear_temp_on_startup_without_resume: true,
            retention: Duration::from_secs(300),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Jobs put back on the queue, in claim order.
    pub requeued: Vec<Uuid>,
    /// Jobs failed because they ran out of resume attempts.
    pub exhausted: Vec<Uuid>,
    /// Ledger entries that could not be read and were failed.
    pub unreadable: Vec<Uuid>,
    pub evicted: usize,
    /// Set when resume is off and the ledger was discarded.
    pub ledger_cleared: bool,
    pub temp_files_removed: usize,
    pub quarantined: Option<PathBuf>,
}

/// Parse a client-supplied job id. Anything that is not a UUID cannot name
/// a job, so it is reported as not found.
pub fn parse_job_id(raw: &str) -> Result<Uuid, NexusError> {
    Uuid::parse_str(raw.trim()).map_err(|_| NexusError::JobNotFound(raw.to_string()))
}

// ============================================================================
// JobQueue
// ============================================================================

struct PendingJob {
    id: Uuid,
    /// Bound at submit time. Jobs restored from the ledger bind when claimed.
    bound: Option<BoundCapability>,
}

struct Inner {
    settings: QueueSettings,
    ledger: Ledger,
    executor: Arc<Executor>,
    registry: CapabilityRegistry,
    /// Held from snapshot to commit of every ledger write after recovery.
    writer: AsyncMutex<()>,
    jobs: Mutex<BTreeMap<Uuid, Job>>,
    pending: Mutex<VecDeque<PendingJob>>,
    available: Notify,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Open the ledger and run startup recovery. Workers are not started.
    pub fn open(
        settings: QueueSettings,
        executor: Arc<Executor>,
        registry: CapabilityRegistry,
    ) -> Result<(Self, RecoveryReport), NexusError> {
        let ledger = Ledger::new(&settings.state_file);
        let (shutdown, _) = watch::channel(false);
        let queue = Self {
            inner: Arc::new(Inner {
                settings,
                ledger,
                executor,
                registry,
                writer: AsyncMutex::new(()),
                jobs: Mutex::new(BTreeMap::new()),
                pending: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                shutdown,
                workers: Mutex::new(Vec::new()),
            }),
        };
        let report = queue.recover()?;
        Ok((queue, report))
    }

    fn recover(&self) -> Result<RecoveryReport, NexusError> {
        let inner = &self.inner;
        let mut report = RecoveryReport::default();

        if !inner.settings.resume_on_startup {
            inner.ledger.clear()?;
            report.ledger_cleared = true;
            if inner.settings.clear_temp_on_startup_without_resume {
                report.temp_files_removed = clear_temp_dir(&inner.settings.temp_dir)
                    .map_err(|e| {
                        NexusError::Persistence(format!(
                            "clear temp dir {}: {}",
                            inner.settings.temp_dir.display(),
                            e
                        ))
                    })?;
            }
            log::info!(
                "Resume disabled: ledger cleared, {} temp files removed",
                report.temp_files_removed
            );
            return Ok(report);
        }

        let load = inner.ledger.load()?;
        report.unreadable = load.unreadable;
        report.quarantined = load.quarantined;

        let mut jobs = load.jobs;
        let now = Utc::now();
        let mut requeue: Vec<(DateTime<Utc>, Uuid)> = Vec::new();
        for job in jobs.values_mut() {
            match job.status {
                JobStatus::Running if job.attempts < inner.settings.max_resume_attempts => {
                    if job.requeue_for_resume(now).is_ok() {
                        requeue.push((job.created_at, job.id));
                    }
                }
                JobStatus::Running => {
                    let err = NexusError::Execution {
                        message: format!(
                            "job interrupted {} times; giving up",
                            job.attempts
                        ),
                    };
                    if job.fail(inner.executor.envelope(&err), now).is_ok() {
                        report.exhausted.push(job.id);
                    }
                }
                JobStatus::Queued => requeue.push((job.created_at, job.id)),
                _ => {}
            }
        }
        requeue.sort();
        report.requeued = requeue.into_iter().map(|(_, id)| id).collect();

        let retention = retention_window(inner.settings.retention);
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(now, retention));
        report.evicted = before - jobs.len();

        inner.ledger.store(&jobs)?;
        *inner.jobs.lock() = jobs;
        inner.pending.lock().extend(
            report
                .requeued
                .iter()
                .map(|id| PendingJob { id: *id, bound: None }),
        );

        log::info!(
            "Recovered ledger: {} requeued, {} exhausted, {} unreadable, {} evicted",
            report.requeued.len(),
            report.exhausted.len(),
            report.unreadable.len(),
            report.evicted
        );
        Ok(report)
    }

    /// Spawn the worker pool and the eviction janitor. Calling it again is a no-op.
    pub fn start_workers(&self) {
        let mut workers = self.inner.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for index in 0..self.inner.settings.max_threads {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(worker_loop(inner, index, shutdown)));
        }
        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        workers.push(tokio::spawn(janitor_loop(inner, shutdown)));
        log::info!(
            "Started {} queue workers",
            self.inner.settings.max_threads
        );
    }

    /// Accept a queued-mode call. Never waits for queue capacity; returns
    /// once the job is in the ledger.
    pub async fn submit(
        &self,
        bound: BoundCapability,
        args: Map<String, Value>,
        owner: &str,
    ) -> Result<Uuid, NexusError> {
        let inner = &self.inner;
        let writer = inner.writer.lock().await;
        let depth = inner.pending.lock().len();
        if depth >= inner.settings.max_queue_size {
            log::warn!(
                "Queue full ({}), rejecting {}",
                inner.settings.max_queue_size,
                bound.descriptor().key
            );
            return Err(NexusError::QueueFull {
                capacity: inner.settings.max_queue_size,
            });
        }

        let job = Job::new(bound.descriptor().key.as_str(), owner, args);
        let id = job.id;
        let stored = inner
            .store_locked(move |jobs| {
                jobs.insert(id, job);
                Ok(())
            })
            .await;
        if let Err(e) = stored {
            log::error!("Failed to persist job {}: {}", id, e);
            return Err(e);
        }
        log::debug!("Job {} queued for {}", id, bound.descriptor().key);
        inner.pending.lock().push_back(PendingJob {
            id,
            bound: Some(bound),
        });
        drop(writer);
        inner.available.notify_one();
        Ok(id)
    }

    /// Non-blocking read of a job's state on behalf of `owner`.
    pub fn poll(&self, id: Uuid, owner: &str) -> Result<JobView, NexusError> {
        let jobs = self.inner.jobs.lock();
        let job = jobs
            .get(&id)
            .ok_or_else(|| NexusError::JobNotFound(id.to_string()))?;
        if job.owner != owner {
            return Err(NexusError::Unauthorized(
                "job belongs to a different API key".to_string(),
            ));
        }
        Ok(job.view())
    }

    /// An owner's jobs, newest first.
    pub fn jobs_for_owner(&self, owner: &str) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .inner
            .jobs
            .lock()
            .values()
            .filter(|job| job.owner == owner)
            .map(Job::summary)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.lock().get(&id).cloned()
    }

    /// Jobs waiting to be claimed.
    pub fn depth(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Jobs in the ledger, any status.
    pub fn len(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Drop terminal jobs whose retention window has passed.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, NexusError> {
        self.inner.evict_expired(now).await
    }

    /// Stop the workers. Jobs being executed stay `running` in the ledger and
    /// are picked up by recovery on the next start.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.pending.lock().clear();
        log::info!("Job queue stopped");
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("state_file", &self.inner.settings.state_file)
            .field("depth", &self.depth())
            .field("jobs", &self.len())
            .finish()
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn worker_loop(inner: Arc<Inner>, index: usize, mut shutdown: watch::Receiver<bool>) {
    log::debug!("Queue worker {} started", index);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = inner.pending.lock().pop_front();
        match next {
            Some(pending) => inner.run(pending).await,
            None => {
                tokio::select! {
                    _ = inner.available.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    log::debug!("Queue worker {} stopped", index);
}

async fn janitor_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.settings.eviction_interval.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = inner.evict_expired(Utc::now()).await {
                    log::error!("Eviction pass failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn retention_window(retention: Duration) -> chrono::Duration {
    chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

impl Inner {
    async fn run(&self, pending: PendingJob) {
        let PendingJob { id, bound } = pending;
        let claimed = {
            let jobs = self.jobs.lock();
            jobs.get(&id)
                .filter(|job| job.status == JobStatus::Queued)
                .map(|job| (job.capability.clone(), job.args.clone()))
        };
        let Some((capability, args)) = claimed else {
            log::warn!("Job {} vanished or left the queued state before claim", id);
            return;
        };

        let bound = match bound {
            Some(bound) => bound,
            None => match self.registry.bind(&capability) {
                Ok(bound) => bound,
                Err(e) => {
                    log::warn!("Job {} cannot run: {}", id, e);
                    let envelope = self.executor.envelope(&e);
                    let stored = self
                        .transition(id, |job, now| job.fail(envelope, now))
                        .await;
                    if let Err(e) = stored {
                        self.fail_unstored(id, &e);
                    }
                    return;
                }
            },
        };

        let generation = bound.generation_id();
        if let Err(e) = self
            .transition(id, |job, now| job.start(generation, now))
            .await
        {
            self.fail_unstored(id, &e);
            return;
        }

        let outcome = self.executor.execute(&bound, &args).await;
        drop(bound);
        let stored = match outcome {
            Ok(result) => {
                self.transition(id, |job, now| job.complete(result, now))
                    .await
            }
            Err(e @ NexusError::ExecutionTimeout { .. }) => {
                let envelope = self.executor.envelope(&e);
                self.transition(id, |job, now| job.time_out(envelope, now))
                    .await
            }
            Err(e) => {
                let envelope = self.executor.envelope(&e);
                self.transition(id, |job, now| job.fail(envelope, now))
                    .await
            }
        };
        if let Err(e) = stored {
            self.fail_unstored(id, &e);
        }
    }

    /// Apply one transition to a copy of the job, store it, then commit it.
    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<(), NexusError>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<(), InvalidTransition>,
    {
        let _writer = self.writer.lock().await;
        self.store_locked(|jobs| {
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| NexusError::JobNotFound(id.to_string()))?;
            let from = job.status;
            apply(job, Utc::now())
                .map_err(|e| NexusError::Persistence(format!("job {}: {}", id, e)))?;
            log::debug!("Job {} {} -> {}", id, from, job.status);
            Ok(())
        })
        .await
    }

    /// Copy the job map, apply `change` to the copy, write it to the ledger
    /// and swap it in. The caller holds `writer`.
    async fn store_locked<F, R>(&self, change: F) -> Result<R, NexusError>
    where
        F: FnOnce(&mut BTreeMap<Uuid, Job>) -> Result<R, NexusError>,
    {
        let mut next = self.jobs.lock().clone();
        let out = change(&mut next)?;
        let ledger = self.ledger.clone();
        let next = tokio::task::spawn_blocking(move || ledger.store(&next).map(|()| next))
            .await
            .map_err(|e| NexusError::Persistence(format!("ledger write task: {}", e)))??;
        *self.jobs.lock() = next;
        Ok(out)
    }

    /// Fail a job in memory only, after its transition could not be stored.
    fn fail_unstored(&self, id: Uuid, err: &NexusError) {
        log::error!("Failed to persist job {} transition: {}", id, err);
        let envelope = self.executor.envelope(err);
        if let Some(job) = self.jobs.lock().get_mut(&id) {
            if let Err(e) = job.fail(envelope, Utc::now()) {
                log::error!("Job {}: {}", id, e);
            }
        }
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, NexusError> {
        let retention = retention_window(self.settings.retention);
        let _writer = self.writer.lock().await;
        let expired = self
            .jobs
            .lock()
            .values()
            .filter(|job| job.is_expired(now, retention))
            .count();
        if expired == 0 {
            return Ok(0);
        }
        let evicted = self
            .store_locked(|jobs| {
                let before = jobs.len();
                jobs.retain(|_, job| !job.is_expired(now, retention));
                Ok(before - jobs.len())
            })
            .await?;
        log::info!("Evicted {} expired jobs", evicted);
        Ok(evicted)
    }
}
