//! Reload supervisor: rebuilds the registry when bundles change and swaps
//! generations without disturbing calls bound to the outgoing one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::snapshot::BundleSnapshot;
use crate::capabilities::{BundleLoader, CapabilityRegistry, LoadReport, RegistryGeneration};

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("bundle load task failed: {0}")]
    LoadTask(String),
}

#[derive(Debug, Clone)]
pub struct ReloadSettings {
    pub bundle_paths: Vec<PathBuf>,
    /// Poll for bundle changes on every tick.
    pub reload_on_change: bool,
    pub interval: Duration,
    /// Defer each swap until the outgoing generation has no calls in flight.
    pub wait_for_processing: bool,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            bundle_paths: vec![PathBuf::from("custom_apis")],
            reload_on_change: true,
            interval: Duration::from_secs(120),
            wait_for_processing: true,
        }
    }
}

struct Inner {
    settings: ReloadSettings,
    loader: Arc<BundleLoader>,
    registry: CapabilityRegistry,
    snapshot: Mutex<BundleSnapshot>,
    last_report: Mutex<Option<LoadReport>>,
    /// Serializes load-and-swap passes.
    reload_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ReloadSupervisor {
    inner: Arc<Inner>,
}

impl ReloadSupervisor {
    pub fn new(settings: ReloadSettings, loader: Arc<BundleLoader>, registry: CapabilityRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                settings,
                loader,
                registry,
                snapshot: Mutex::new(BundleSnapshot::default()),
                last_report: Mutex::new(None),
                reload_lock: tokio::sync::Mutex::new(()),
                trigger: Notify::new(),
                shutdown,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.inner.settings
    }

    /// Report of the most recent load pass.
    pub fn last_report(&self) -> Option<LoadReport> {
        self.inner.last_report.lock().clone()
    }

    /// First load at startup. Nothing is in flight yet, so the swap is immediate.
    pub async fn initial_load(&self) -> Result<LoadReport, ReloadError> {
        self.reload(false).await
    }

    /// One load-and-swap pass, honouring `wait_for_processing`.
    pub async fn reload_now(&self) -> Result<LoadReport, ReloadError> {
        self.reload(self.inner.settings.wait_for_processing).await
    }

    /// Whether any file under the bundle paths changed since the last pass.
    pub fn has_changes(&self) -> bool {
        let current = BundleSnapshot::capture(&self.inner.settings.bundle_paths);
        let changes = self.inner.snapshot.lock().changes(&current);
        if !changes.is_empty() {
            log::debug!("Bundle changes detected: {:?}", changes);
        }
        !changes.is_empty()
    }

    /// Ask the background loop to reload on its next iteration.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    async fn reload(&self, wait_for_processing: bool) -> Result<LoadReport, ReloadError> {
        let inner = &self.inner;
        let _pass = inner.reload_lock.lock().await;

        let paths = inner.settings.bundle_paths.clone();
        let snapshot = BundleSnapshot::capture(&paths);
        let generation_id = inner.registry.next_generation_id();
        let loader = Arc::clone(&inner.loader);
        let outcome = tokio::task::spawn_blocking(move || loader.load(&paths, generation_id))
            .await
            .map_err(|e| ReloadError::LoadTask(e.to_string()))?;

        for (bundle, reason) in &outcome.report.failures {
            log::error!("Bundle '{}' failed to load: {}", bundle, reason);
        }

        if wait_for_processing {
            let outgoing = inner.registry.current();
            let in_flight = outgoing.in_flight();
            if in_flight > 0 {
                log::info!(
                    "Waiting for {} calls on generation {} before swapping",
                    in_flight,
                    outgoing.id()
                );
                let patience = inner.settings.interval.max(Duration::from_secs(1));
                wait_drained_noisily(&outgoing, patience).await;
            }
        }

        inner.registry.swap(outcome.generation);
        *inner.snapshot.lock() = snapshot;
        *inner.last_report.lock() = Some(outcome.report.clone());
        Ok(outcome.report)
    }

    /// Spawn the background loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }
        let supervisor = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            let period = supervisor.inner.settings.interval.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                let forced = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = supervisor.inner.trigger.notified() => true,
                    _ = shutdown.changed() => break,
                };
                if !forced && !(supervisor.inner.settings.reload_on_change && supervisor.has_changes()) {
                    continue;
                }
                match supervisor.reload_now().await {
                    Ok(report) => log::info!(
                        "Reload complete: generation {}, {} capabilities, {} failures",
                        report.generation_id,
                        report.loaded.len(),
                        report.failures.len()
                    ),
                    Err(e) => log::error!("Reload failed: {}", e),
                }
            }
        }));
    }

    /// Stop the background loop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Wait for `generation` to drain, logging a warning every `patience` it is
/// still busy. Returns the number of warnings.
async fn wait_drained_noisily(generation: &RegistryGeneration, patience: Duration) -> u32 {
    let mut warnings = 0;
    while tokio::time::timeout(patience, generation.wait_drained())
        .await
        .is_err()
    {
        warnings += 1;
        log::warn!(
            "Reload still waiting on generation {}: {} calls in flight after {:?}",
            generation.id(),
            generation.in_flight(),
            patience * warnings
        );
    }
    warnings
}

impl std::fmt::Debug for ReloadSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadSupervisor")
            .field("settings", &self.inner.settings)
            .field("generation", &self.inner.registry.generation_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Arguments, FnCapability, HandlerCatalog, NoopResolver};
    use crate::convert::{Converter, NativeValue};
    use crate::dispatch::Executor;
    use crate::queue::{JobQueue, JobStatus, QueueSettings};
    use serde_json::{json, Map};
    use std::path::Path;

    fn manifest(handler: &str) -> String {
        format!(
            r#"
bundle:
  capabilities:
    - name: run
      execution_mode: queued
      handler: {}
      returns:
        - {{ name: version, kind: string }}
"#,
            handler
        )
    }

    fn write_bundle(root: &Path, name: &str, content: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bundle.yaml"), content).unwrap();
    }

    fn versioned(tag: &'static str, delay: Duration) -> FnCapability {
        FnCapability::new(1, move |_a: Arguments| async move {
            tokio::time::sleep(delay).await;
            Ok(vec![NativeValue::from(tag)])
        })
    }

    fn supervisor(root: &Path, wait: bool) -> ReloadSupervisor {
        let mut catalog = HandlerCatalog::new();
        catalog.register("test.v1", versioned("v1", Duration::from_millis(300)).shared());
        catalog.register("test.v2", versioned("v2", Duration::ZERO).shared());
        let loader = Arc::new(BundleLoader::new(catalog, Arc::new(NoopResolver)));
        let settings = ReloadSettings {
            bundle_paths: vec![root.to_path_buf()],
            reload_on_change: true,
            interval: Duration::from_secs(60),
            wait_for_processing: wait,
        };
        ReloadSupervisor::new(settings, loader, CapabilityRegistry::new())
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_bundle() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", &manifest("test.v2"));
        let sup = supervisor(root.path(), true);

        let first = sup.initial_load().await.unwrap();
        assert_eq!(first.loaded, vec!["alpha/run"]);
        assert!(!sup.has_changes());

        write_bundle(root.path(), "beta", &manifest("test.v2"));
        assert!(sup.has_changes());
        let second = sup.reload_now().await.unwrap();
        assert!(second.generation_id > first.generation_id);
        assert_eq!(second.loaded, vec!["alpha/run", "beta/run"]);
        assert_eq!(sup.registry().generation_id(), second.generation_id);
        assert_eq!(sup.last_report(), Some(second));
    }

    #[tokio::test]
    async fn test_broken_bundle_is_reported_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "good", &manifest("test.v2"));
        write_bundle(root.path(), "bad", "bundle: [oops");
        let sup = supervisor(root.path(), false);
        let report = sup.initial_load().await.unwrap();
        assert_eq!(report.loaded, vec!["good/run"]);
        assert!(report.failures.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_wait_for_processing_defers_swap() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", &manifest("test.v2"));
        let sup = supervisor(root.path(), true);
        sup.initial_load().await.unwrap();
        let before = sup.registry().generation_id();

        let held = sup.registry().bind("alpha/run").unwrap();
        let pending = tokio::spawn({
            let sup = sup.clone();
            async move { sup.reload_now().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.registry().generation_id(), before);

        drop(held);
        let report = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(sup.registry().generation_id(), report.generation_id);
        assert!(report.generation_id > before);
    }

    #[tokio::test]
    async fn test_slow_drain_warns_each_interval_and_keeps_waiting() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", &manifest("test.v2"));
        let sup = supervisor(root.path(), true);
        sup.initial_load().await.unwrap();

        let generation = sup.registry().current();
        let held = sup.registry().bind("alpha/run").unwrap();
        let waiter = tokio::spawn({
            let generation = Arc::clone(&generation);
            async move { wait_drained_noisily(&generation, Duration::from_millis(50)).await }
        });
        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let warnings = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(warnings >= 2);
        assert_eq!(generation.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_idle_generation_drains_without_warning() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", &manifest("test.v2"));
        let sup = supervisor(root.path(), true);
        sup.initial_load().await.unwrap();
        let generation = sup.registry().current();
        assert_eq!(wait_drained_noisily(&generation, Duration::from_millis(50)).await, 0);
    }

    #[tokio::test]
    async fn test_swap_during_running_job_keeps_its_outcome() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "svc", &manifest("test.v1"));
        let sup = supervisor(root.path(), false);
        sup.initial_load().await.unwrap();
        let registry = sup.registry().clone();

        let executor = Arc::new(Executor::new(
            Converter::new(root.path().join("tmp"), true),
            Duration::from_secs(5),
            false,
        ));
        let settings = QueueSettings {
            max_threads: 2,
            state_file: root.path().join("state/state.json"),
            temp_dir: root.path().join("tmp"),
            ..QueueSettings::default()
        };
        let (queue, _) = JobQueue::open(settings, executor, registry.clone()).unwrap();
        queue.start_workers();

        let old = queue
            .submit(registry.bind("svc/run").unwrap(), Map::new(), "o")
            .await
            .unwrap();
        for _ in 0..100 {
            if queue.job(old).unwrap().status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        write_bundle(root.path(), "svc", &manifest("test.v2"));
        sup.reload_now().await.unwrap();

        let new = queue
            .submit(registry.bind("svc/run").unwrap(), Map::new(), "o")
            .await
            .unwrap();
        for _ in 0..200 {
            let done = [old, new]
                .iter()
                .all(|id| queue.job(*id).unwrap().status.is_terminal());
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(queue.job(old).unwrap().result, Some(json!({"version": "v1"})));
        assert_eq!(queue.job(new).unwrap().result, Some(json!({"version": "v2"})));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_trigger_forces_reload() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", &manifest("test.v2"));
        let sup = supervisor(root.path(), false);
        sup.initial_load().await.unwrap();
        let before = sup.registry().generation_id();
        sup.start();
        sup.trigger();
        for _ in 0..100 {
            if sup.registry().generation_id() > before {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sup.registry().generation_id() > before);
        sup.stop().await;
    }
}
