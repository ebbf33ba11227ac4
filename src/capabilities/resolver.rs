//! Per-bundle dependency installation.
//!
//! The loader asks a [`DependencyResolver`] to install a bundle's declared
//! requirements before binding its capabilities. A failed install excludes
//! that bundle only. The loader remembers a fingerprint of every requirement
//! set it has resolved, so each set is installed at most once per process.

use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};

/// Installs third-party requirements for a bundle.
pub trait DependencyResolver: Send + Sync {
    /// Install `requirements` for the bundle rooted at `bundle_dir`.
    fn install(&self, bundle: &str, bundle_dir: &Path, requirements: &[String]) -> Result<(), String>;
}

/// Accepts every bundle without installing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl DependencyResolver for NoopResolver {
    fn install(&self, bundle: &str, _bundle_dir: &Path, requirements: &[String]) -> Result<(), String> {
        if !requirements.is_empty() {
            log::debug!(
                "Bundle '{}' declares {} requirement(s); no resolver configured",
                bundle,
                requirements.len()
            );
        }
        Ok(())
    }
}

/// Runs a configured command with the requirement list appended,
/// e.g. `["pip", "install", "--quiet"]`.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
}

impl CommandResolver {
    /// Build from a command line; `None` if it is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl DependencyResolver for CommandResolver {
    fn install(&self, bundle: &str, bundle_dir: &Path, requirements: &[String]) -> Result<(), String> {
        if requirements.is_empty() {
            return Ok(());
        }
        log::info!("Installing requirements for bundle '{}': {:?}", bundle, requirements);
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(requirements)
            .current_dir(bundle_dir)
            .output()
            .map_err(|e| format!("failed to run '{}': {}", self.program, e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

/// Requirements listed in a bundle's `requirements.txt`, if present.
///
/// Blank lines and `#` comments are skipped.
pub fn read_requirements_file(bundle_dir: &Path) -> std::io::Result<Vec<String>> {
    let path = bundle_dir.join("requirements.txt");
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Stable fingerprint of a bundle's requirement set.
pub fn fingerprint(bundle: &str, requirements: &[String]) -> String {
    let mut sorted: Vec<&str> = requirements.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = Sha256::new();
    hasher.update(bundle.as_bytes());
    for req in sorted {
        hasher.update([0u8]);
        hasher.update(req.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_order_and_duplicates() {
        let a = fingerprint("text", &["numpy".into(), "nltk".into()]);
        let b = fingerprint("text", &["nltk".into(), "numpy".into(), "nltk".into()]);
        assert_eq!(a, b);
        assert_ne!(a, fingerprint("image", &["numpy".into(), "nltk".into()]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_read_requirements_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_requirements_file(dir.path()).unwrap().is_empty());
        std::fs::write(
            dir.path().join("requirements.txt"),
            "numpy>=1.24\n\n# comment\npillow  # imaging\n",
        )
        .unwrap();
        assert_eq!(
            read_requirements_file(dir.path()).unwrap(),
            vec!["numpy>=1.24", "pillow"]
        );
    }

    #[test]
    fn test_command_resolver_reports_failure() {
        assert!(CommandResolver::new(&[]).is_none());
        let resolver = CommandResolver::new(&["definitely-not-a-real-binary-xyz".into()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(resolver.install("b", dir.path(), &["x".into()]).is_err());
        assert!(resolver.install("b", dir.path(), &[]).is_ok());
    }
}
