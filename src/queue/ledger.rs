//! Durable job ledger: one JSON file mapping job id → job record.
//!
//! Every write goes to a temp file in the same directory, is synced, and is
//! then renamed over the ledger, so a crash leaves either the previous or the
//! new contents on disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use uuid::Uuid;

use super::job::{Job, JobStatus};
use crate::error::{ErrorEnvelope, NexusError};

/// Jobs read back from disk.
#[derive(Debug, Default)]
pub struct LedgerLoad {
    pub jobs: BTreeMap<Uuid, Job>,
    /// Entries that could not be parsed and were turned into failed jobs.
    pub unreadable: Vec<Uuid>,
    /// Set when the whole file was unreadable and moved aside.
    pub quarantined: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger.
    ///
    /// A missing file is an empty ledger. A file that is not a JSON object is
    /// renamed to `<path>.corrupt`. Individual entries that fail to parse
    /// become failed jobs so their owners see an error instead of a 404.
    pub fn load(&self) -> Result<LedgerLoad, NexusError> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LedgerLoad::default()),
            Err(e) => return Err(persistence("read", &self.path, e)),
        };

        let entries = match serde_json::from_slice::<Value>(&content) {
            Ok(Value::Object(entries)) => entries,
            Ok(_) | Err(_) => {
                let quarantine = self.corrupt_path();
                log::error!(
                    "Ledger {:?} is unreadable; moving it to {:?}",
                    self.path,
                    quarantine
                );
                std::fs::rename(&self.path, &quarantine)
                    .map_err(|e| persistence("quarantine", &self.path, e))?;
                return Ok(LedgerLoad {
                    quarantined: Some(quarantine),
                    ..LedgerLoad::default()
                });
            }
        };

        let mut load = LedgerLoad::default();
        for (key, raw) in entries {
            let id = match Uuid::parse_str(&key) {
                Ok(id) => id,
                Err(_) => {
                    log::warn!("Dropping ledger entry with non-UUID key '{}'", key);
                    continue;
                }
            };
            match serde_json::from_value::<Job>(raw.clone()) {
                Ok(mut job) => {
                    job.id = id;
                    load.jobs.insert(id, job);
                }
                Err(e) => {
                    log::error!("Ledger entry {} is unreadable: {}", id, e);
                    load.jobs.insert(id, unreadable_job(id, &raw));
                    load.unreadable.push(id);
                }
            }
        }
        Ok(load)
    }

    /// Atomically replace the ledger with `jobs`.
    pub fn store(&self, jobs: &BTreeMap<Uuid, Job>) -> Result<(), NexusError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| persistence("create", &dir, e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| persistence("create", &dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, jobs)
            .map_err(|e| NexusError::Persistence(format!("serialize ledger: {}", e)))?;
        tmp.flush().map_err(|e| persistence("write", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| persistence("sync", tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| persistence("replace", &self.path, e.error))?;
        Ok(())
    }

    /// Delete the ledger file if present.
    pub fn clear(&self) -> Result<(), NexusError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence("remove", &self.path, e)),
        }
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }
}

fn persistence(action: &str, path: &Path, err: std::io::Error) -> NexusError {
    NexusError::Persistence(format!("{} {}: {}", action, path.display(), err))
}

/// A failed job standing in for an entry that did not parse.
fn unreadable_job(id: Uuid, raw: &Value) -> Job {
    let text = |field: &str| raw.get(field).and_then(Value::as_str).unwrap_or_default().to_string();
    let now = Utc::now();
    Job {
        id,
        capability: text("capability"),
        owner: text("owner"),
        args: Map::new(),
        status: JobStatus::Failed,
        result: None,
        error: Some(ErrorEnvelope {
            error: 500,
            description: "Persistence error".to_string(),
            details: json!({ "reason": "ledger entry could not be read during recovery" }),
        }),
        created_at: now,
        updated_at: now,
        finished_at: Some(now),
        attempts: raw.get("attempts").and_then(Value::as_u64).unwrap_or(0) as u32,
        generation: None,
    }
}
