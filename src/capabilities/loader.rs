//! Bundle loader: turns directories of bundles into a registry generation.
//!
//! The loader:
//! 1. Discovers bundle directories (those holding a `bundle.yaml`) under each path
//! 2. Installs each bundle's requirements through the [`DependencyResolver`]
//! 3. Parses the manifest and builds one descriptor per capability
//! 4. Binds each descriptor to a catalog handler or a process and validates it
//!
//! A bundle that fails any step is left out of the generation and recorded
//! in [`LoadReport::failures`]; the remaining bundles still load.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::catalog::HandlerCatalog;
use super::descriptor::validate_segment;
use super::error::{DescriptorError, LoadError};
use super::manifest::{BundleManifest, MANIFEST_FILES};
use super::registry::{CapabilityEntry, RegistryGeneration};
use super::resolver::{fingerprint, read_requirements_file, DependencyResolver};
use super::validate::validate;

// ============================================================================
// LoadReport
// ============================================================================

/// Outcome summary of one load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub generation_id: u64,
    /// Bundles that loaded, sorted.
    pub bundles: Vec<String>,
    /// Capability keys in the generation, sorted.
    pub loaded: Vec<String>,
    /// Bundle name → reason, for every bundle left out.
    pub failures: BTreeMap<String, String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A freshly built generation plus its report.
#[derive(Debug)]
pub struct LoadOutcome {
    pub generation: RegistryGeneration,
    pub report: LoadReport,
}

// ============================================================================
// BundleLoader
// ============================================================================

/// Builds registry generations from bundle directories.
pub struct BundleLoader {
    catalog: HandlerCatalog,
    resolver: Arc<dyn DependencyResolver>,
    /// Fingerprints of requirement sets already installed.
    resolved: Mutex<HashSet<String>>,
}

impl BundleLoader {
    pub fn new(catalog: HandlerCatalog, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self {
            catalog,
            resolver,
            resolved: Mutex::new(HashSet::new()),
        }
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    /// Load every bundle under `paths` into generation `generation_id`.
    pub fn load(&self, paths: &[PathBuf], generation_id: u64) -> LoadOutcome {
        let mut entries: HashMap<String, CapabilityEntry> = HashMap::new();
        let mut report = LoadReport {
            generation_id,
            ..LoadReport::default()
        };

        for dir in discover_bundles(paths) {
            let fallback = dir_name(&dir);
            match self.load_bundle(&dir) {
                Ok((bundle, bundle_entries)) => {
                    if let Some(dup) = bundle_entries
                        .iter()
                        .map(|e| e.descriptor.key.as_str())
                        .find(|key| entries.contains_key(*key))
                    {
                        let err = LoadError::from(DescriptorError::DuplicateKey(dup.to_string()));
                        log::warn!("Skipping bundle '{}' ({:?}): {}", bundle, dir, err);
                        report.failures.insert(bundle, err.to_string());
                        continue;
                    }
                    log::info!(
                        "Loaded bundle '{}' with {} capabilities",
                        bundle,
                        bundle_entries.len()
                    );
                    for entry in bundle_entries {
                        entries.insert(entry.descriptor.key.to_string(), entry);
                    }
                    report.bundles.push(bundle);
                }
                Err((bundle, err)) => {
                    let bundle = bundle.unwrap_or(fallback);
                    log::warn!("Skipping bundle '{}' ({:?}): {}", bundle, dir, err);
                    report.failures.insert(bundle, err.to_string());
                }
            }
        }

        report.bundles.sort();
        report.loaded = entries.keys().cloned().collect();
        report.loaded.sort();
        LoadOutcome {
            generation: RegistryGeneration::new(generation_id, entries),
            report,
        }
    }

    /// Import one bundle. On failure the bundle name is returned when known.
    fn load_bundle(
        &self,
        dir: &Path,
    ) -> Result<(String, Vec<CapabilityEntry>), (Option<String>, LoadError)> {
        let manifest_path = manifest_path(dir)
            .ok_or_else(|| (None, LoadError::Io(std::io::ErrorKind::NotFound.into())))?;
        let manifest = BundleManifest::from_yaml_file(&manifest_path).map_err(|e| (None, e))?;
        let bundle = manifest.bundle.name.clone().unwrap_or_else(|| dir_name(dir));
        let fail = |e: LoadError| (Some(bundle.clone()), e);

        validate_segment(&bundle).map_err(|e| fail(e.into()))?;
        self.install_requirements(&bundle, dir, &manifest.bundle.requirements)
            .map_err(fail)?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(manifest.bundle.capabilities.len());
        for def in &manifest.bundle.capabilities {
            let descriptor = def.to_descriptor(&bundle).map_err(|e| fail(e.into()))?;
            if !seen.insert(descriptor.key.to_string()) {
                return Err(fail(
                    DescriptorError::DuplicateKey(descriptor.key.to_string()).into(),
                ));
            }
            let binding = def.binding(&descriptor.key).map_err(fail)?;
            let return_names = descriptor.returns.iter().map(|r| r.name.clone()).collect();
            let callable = self
                .catalog
                .bind(descriptor.key.as_str(), binding, dir, return_names)
                .map_err(fail)?;
            validate(&descriptor, callable.declared_outputs()).map_err(|e| fail(e.into()))?;
            entries.push(CapabilityEntry::new(descriptor, callable));
        }
        Ok((bundle, entries))
    }

    fn install_requirements(
        &self,
        bundle: &str,
        dir: &Path,
        declared: &[String],
    ) -> Result<(), LoadError> {
        let mut requirements = declared.to_vec();
        requirements.extend(read_requirements_file(dir)?);
        if requirements.is_empty() {
            return Ok(());
        }
        let print = fingerprint(bundle, &requirements);
        if self.resolved.lock().contains(&print) {
            return Ok(());
        }
        self.resolver
            .install(bundle, dir, &requirements)
            .map_err(LoadError::Dependency)?;
        self.resolved.lock().insert(print);
        Ok(())
    }
}

impl std::fmt::Debug for BundleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLoader")
            .field("catalog", &self.catalog)
            .finish()
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Bundle directories under `paths`, sorted for a deterministic load order.
///
/// Directories named `_*` or `.*` are skipped, as are the contents of a
/// bundle directory itself.
pub fn discover_bundles(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for path in paths {
        if !path.is_dir() {
            log::warn!("Bundle path {:?} is not a directory; skipping", path);
            continue;
        }
        walk(path, &mut found);
    }
    found.sort();
    found.dedup();
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    if manifest_path(dir).is_some() {
        found.push(dir.to_path_buf());
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read {:?}: {}", dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, found);
        }
    }
}

fn manifest_path(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::capability::{Arguments, FnCapability};
    use crate::capabilities::resolver::NoopResolver;
    use crate::convert::NativeValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> HandlerCatalog {
        let mut catalog = HandlerCatalog::new();
        catalog.register(
            "echo",
            FnCapability::new(1, |args: Arguments| async move {
                Ok(vec![NativeValue::from(args.text("text")?.to_string())])
            })
            .shared(),
        );
        catalog
    }

    fn write_bundle(root: &Path, dir: &str, yaml: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("bundle.yaml"), yaml).unwrap();
    }

    const ECHO: &str = r#"
bundle:
  capabilities:
    - name: echo
      handler: echo
      params:
        - { name: text, kind: string, required: true }
      returns:
        - { name: text, kind: string }
"#;

    #[test]
    fn test_load_from_directory() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "alpha", ECHO);
        write_bundle(root.path(), "nested/beta", ECHO);

        let loader = BundleLoader::new(catalog(), Arc::new(NoopResolver));
        let outcome = loader.load(&[root.path().to_path_buf()], 7);
        assert!(outcome.report.is_clean());
        assert_eq!(outcome.report.generation_id, 7);
        assert_eq!(outcome.report.loaded, vec!["alpha/echo", "beta/echo"]);
        assert_eq!(outcome.generation.id(), 7);
        assert!(outcome.generation.get("beta/echo").is_some());
    }

    #[test]
    fn test_failing_bundle_is_isolated() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "good", ECHO);
        write_bundle(root.path(), "broken", "bundle: [not, a, map");
        write_bundle(
            root.path(),
            "badkind",
            r#"
bundle:
  capabilities:
    - name: x
      handler: echo
      params:
        - { name: t, kind: tensor }
"#,
        );
        write_bundle(
            root.path(),
            "nohandler",
            r#"
bundle:
  capabilities:
    - name: x
      handler: missing
"#,
        );

        let loader = BundleLoader::new(catalog(), Arc::new(NoopResolver));
        let outcome = loader.load(&[root.path().to_path_buf()], 1);
        assert_eq!(outcome.report.loaded, vec!["good/echo"]);
        assert_eq!(outcome.report.bundles, vec!["good"]);
        let failed: Vec<&str> = outcome.report.failures.keys().map(String::as_str).collect();
        assert_eq!(failed, vec!["badkind", "broken", "nohandler"]);
        assert!(outcome.report.failures["badkind"].contains("tensor"));
    }

    #[test]
    fn test_arity_mismatch_excludes_bundle() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(
            root.path(),
            "two",
            r#"
bundle:
  capabilities:
    - name: x
      handler: echo
      returns:
        - { name: a, kind: string }
        - { name: b, kind: string }
"#,
        );
        let loader = BundleLoader::new(catalog(), Arc::new(NoopResolver));
        let outcome = loader.load(&[root.path().to_path_buf()], 1);
        assert!(outcome.generation.is_empty());
        assert!(outcome.report.failures["two"].contains("declares 2"));
    }

    #[test]
    fn test_duplicate_key_fails_later_bundle() {
        let root = tempfile::tempdir().unwrap();
        let named = r#"
bundle:
  name: shared
  capabilities:
    - name: echo
      handler: echo
"#;
        write_bundle(root.path(), "a", named);
        write_bundle(root.path(), "b", named);
        let loader = BundleLoader::new(catalog(), Arc::new(NoopResolver));
        let outcome = loader.load(&[root.path().to_path_buf()], 1);
        assert_eq!(outcome.report.loaded, vec!["shared/echo"]);
        assert!(outcome.report.failures["shared"].contains("duplicate capability key"));
    }

    #[test]
    fn test_skips_hidden_and_underscore_dirs() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "_disabled", ECHO);
        write_bundle(root.path(), ".hidden", ECHO);
        write_bundle(root.path(), "live", ECHO);
        assert_eq!(
            discover_bundles(&[root.path().to_path_buf()]),
            vec![root.path().join("live")]
        );
        assert!(discover_bundles(&[root.path().join("missing")]).is_empty());
    }

    struct CountingResolver {
        calls: AtomicUsize,
        fail_for: &'static str,
    }

    impl DependencyResolver for CountingResolver {
        fn install(&self, bundle: &str, _dir: &Path, _reqs: &[String]) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bundle == self.fail_for {
                Err("resolver exploded".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_requirements_installed_once_and_failures_isolated() {
        let root = tempfile::tempdir().unwrap();
        let with_reqs = |name: &str| {
            format!(
                "bundle:\n  name: {}\n  requirements: [\"numpy\"]\n  capabilities:\n    - name: echo\n      handler: echo\n",
                name
            )
        };
        write_bundle(root.path(), "ok", &with_reqs("ok"));
        write_bundle(root.path(), "bad", &with_reqs("bad"));

        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail_for: "bad",
        });
        let loader = BundleLoader::new(catalog(), resolver.clone());
        let paths = [root.path().to_path_buf()];

        let first = loader.load(&paths, 1);
        assert_eq!(first.report.loaded, vec!["ok/echo"]);
        assert!(first.report.failures["bad"].contains("resolver exploded"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

        // "ok" is already resolved; only the failed bundle is retried.
        loader.load(&paths, 2);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }
}
