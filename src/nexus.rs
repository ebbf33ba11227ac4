//! Top-level assembly: one running capability server.
//!
//! Startup order matters. The registry gets its first generation before the
//! queue recovers, so resumed jobs can bind; workers start only after
//! recovery has rebuilt the pending list.

use std::sync::Arc;

use thiserror::Error;

use crate::capabilities::{BundleLoader, CapabilityRegistry, DependencyResolver, HandlerCatalog, LoadReport};
use crate::config::{ConfigError, NexusConfig};
use crate::convert::Converter;
use crate::dispatch::{Dispatcher, Executor};
use crate::error::{ErrorEnvelope, NexusError};
use crate::queue::{JobQueue, RecoveryReport};
use crate::reload::{ReloadError, ReloadSupervisor};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("initial bundle load: {0}")]
    Reload(#[from] ReloadError),

    #[error("job queue recovery: {0}")]
    Queue(#[from] NexusError),
}

/// Running server core shared by both protocol adapters. Cheap to clone.
#[derive(Clone)]
pub struct Nexus {
    config: Arc<NexusConfig>,
    dispatcher: Dispatcher,
    supervisor: ReloadSupervisor,
    initial_load: LoadReport,
    recovery: RecoveryReport,
}

impl Nexus {
    pub async fn start(
        config: NexusConfig,
        catalog: HandlerCatalog,
        resolver: Arc<dyn DependencyResolver>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let registry = CapabilityRegistry::new();
        let loader = Arc::new(BundleLoader::new(catalog, resolver));
        let supervisor = ReloadSupervisor::new(config.reload_settings(), loader, registry.clone());
        let initial_load = supervisor.initial_load().await?;
        log::info!(
            "Loaded {} capabilities from {} bundles ({} failed)",
            initial_load.loaded.len(),
            initial_load.bundles.len(),
            initial_load.failures.len()
        );

        let converter = Converter::new(
            &config.processing.temp_dir,
            config.processing.clear_temp_files_after_processing,
        );
        let executor = Arc::new(Executor::new(
            converter,
            config.process_timeout(),
            config.processing.expose_error_details,
        ));

        let (queue, recovery) =
            JobQueue::open(config.queue_settings(), Arc::clone(&executor), registry.clone())?;
        queue.start_workers();
        supervisor.start();

        Ok(Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(registry, executor, queue),
            supervisor,
            initial_load,
            recovery,
        })
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.dispatcher.registry()
    }

    pub fn queue(&self) -> &JobQueue {
        self.dispatcher.queue()
    }

    pub fn supervisor(&self) -> &ReloadSupervisor {
        &self.supervisor
    }

    pub fn initial_load(&self) -> &LoadReport {
        &self.initial_load
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Wire envelope for an error, with detail exposure per config.
    pub fn envelope(&self, err: &NexusError) -> ErrorEnvelope {
        self.dispatcher.executor().envelope(err)
    }

    /// Stop background tasks. Running jobs stay `running` in the ledger.
    pub async fn shutdown(&self) {
        self.supervisor.stop().await;
        self.queue().shutdown().await;
    }
}

impl std::fmt::Debug for Nexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nexus")
            .field("generation", &self.registry().generation_id())
            .field("queue", self.queue())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capabilities::NoopResolver;
    use crate::dispatch::DispatchOutcome;
    use crate::queue::{JobStatus, JobView};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    pub(crate) const TEXT_BUNDLE: &str = r#"
bundle:
  name: text
  capabilities:
    - name: summarize
      label: Text Summarizer
      category: text
      execution_mode: queued
      handler: text.summarize
      params:
        - { name: text, kind: string, required: true, multiline: true }
        - { name: summary_length, kind: integer, default: 3, min: 1, max: 10 }
      returns:
        - { name: summary, kind: string }
    - name: analyze
      label: Text Analyzer
      category: text
      handler: text.analyze
      params:
        - { name: text, kind: string, required: true }
        - { name: include_sentiment, kind: boolean, default: true }
        - { name: include_statistics, kind: boolean, default: true }
      returns:
        - { name: analysis_results, kind: object }
"#;

    pub(crate) fn config_for(root: &Path) -> NexusConfig {
        let bundles = root.join("apis");
        let text = bundles.join("text");
        std::fs::create_dir_all(&text).unwrap();
        std::fs::write(text.join("bundle.yaml"), TEXT_BUNDLE).unwrap();

        let mut config = NexusConfig::default();
        config.apiserver.apis_dirs = vec![bundles];
        config.processing.state_file = root.join("processing/state.json");
        config.processing.temp_dir = root.join("processing/tmp");
        config.processing.max_threads = 2;
        config
    }

    pub(crate) async fn start(config: NexusConfig) -> Nexus {
        Nexus::start(config, HandlerCatalog::with_builtins(), Arc::new(NoopResolver))
            .await
            .unwrap()
    }

    async fn poll_until_done(nexus: &Nexus, id: uuid::Uuid, owner: &str) -> JobView {
        for _ in 0..250 {
            let view = nexus.queue().poll(id, owner).unwrap();
            if !view.is_pending() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_summarize_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        assert!(nexus.initial_load().is_clean());

        let outcome = nexus
            .dispatcher()
            .invoke(
                "text/summarize",
                json!({"text": "Alpha. Beta. Gamma.", "summary_length": 1}),
                "anonymous",
            )
            .await
            .unwrap();
        let DispatchOutcome::Queued(handle) = outcome else {
            panic!("summarize is queued");
        };
        let view = poll_until_done(&nexus, handle.job_id, "anonymous").await;
        assert_eq!(view.to_value(), json!({"summary": "Alpha."}));
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_direct_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let outcome = nexus
            .dispatcher()
            .invoke("text/analyze", json!({"text": "a good day"}), "anonymous")
            .await
            .unwrap();
        let DispatchOutcome::Direct(result) = outcome else {
            panic!("analyze is direct");
        };
        assert_eq!(result["analysis_results"]["sentiment"]["assessment"], "positive");
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_capability_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let err = nexus
            .dispatcher()
            .invoke("foo/bar", json!({}), "anonymous")
            .await
            .unwrap_err();
        let envelope = nexus.envelope(&err);
        assert_eq!(envelope.error, 404);
        assert!(nexus.queue().is_empty());
        nexus.shutdown().await;
    }

    fn freeze_running_job(state_file: &Path) -> uuid::Uuid {
        let mut job = crate::queue::Job::new(
            "text/summarize",
            "anonymous",
            json!({"text": "One. Two.", "summary_length": 1})
                .as_object()
                .cloned()
                .unwrap(),
        );
        job.status = JobStatus::Running;
        job.attempts = 1;
        let id = job.id;
        let mut jobs = std::collections::BTreeMap::new();
        jobs.insert(id, job);
        crate::queue::Ledger::new(state_file).store(&jobs).unwrap();
        id
    }

    #[tokio::test]
    async fn test_restart_resumes_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let id = freeze_running_job(&config.processing.state_file);

        let nexus = start(config).await;
        assert_eq!(nexus.recovery().requeued, vec![id]);
        let view = poll_until_done(&nexus, id, "anonymous").await;
        assert_eq!(view.to_value(), json!({"summary": "One."}));
        let job = nexus.queue().job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 2);
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_without_resume_discards_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.processing.resume_on_startup = false;
        let id = freeze_running_job(&config.processing.state_file);

        let nexus = start(config).await;
        assert!(nexus.recovery().ledger_cleared);
        assert!(matches!(
            nexus.queue().poll(id, "anonymous"),
            Err(NexusError::JobNotFound(_))
        ));
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_shipped_bundles_load_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.apiserver.apis_dirs = vec![Path::new(env!("CARGO_MANIFEST_DIR")).join("custom_apis")];
        config.processing.reload_on_change = false;
        let nexus = start(config).await;

        let report = nexus.initial_load();
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        let mut keys = nexus.registry().current().keys().into_iter().map(String::from).collect::<Vec<_>>();
        keys.sort();
        assert_eq!(
            keys,
            vec!["image/grayscale", "image/resize", "process/echo", "text/analyze", "text/summarize"]
        );
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.processing.max_queue_size = 0;
        let result =
            Nexus::start(config, HandlerCatalog::with_builtins(), Arc::new(NoopResolver)).await;
        assert!(matches!(result, Err(StartupError::Config(_))));
    }
}
