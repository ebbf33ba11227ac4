//! Server configuration, loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! ```yaml
//! apiserver:
//!   port: 43080
//!   apis_dirs: [custom_apis]
//! security:
//!   api_keys:
//!     - { key: "s3cret", description: "ci" }
//! processing:
//!   max_threads: 4
//!   process_timeout_seconds: 60
//! mcp_server:
//!   enabled: true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueSettings;
use crate::reload::ReloadSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub apiserver: ApiServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub mcp_server: McpServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_apis_dirs")]
    pub apis_dirs: Vec<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            apis_dirs: default_apis_dirs(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Accepted bearer keys. Empty disables authentication.
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_timeout_seconds")]
    pub process_timeout_seconds: u64,
    /// Retention window for finished jobs.
    #[serde(default = "default_timeout_seconds")]
    pub client_idle_timeout_seconds: u64,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_true")]
    pub resume_on_startup: bool,
    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,
    #[serde(default = "default_true")]
    pub clear_temp_on_startup_without_resume: bool,
    #[serde(default = "default_true")]
    pub clear_temp_files_after_processing: bool,
    #[serde(default = "default_true")]
    pub reload_on_change: bool,
    #[serde(default = "default_reload_interval")]
    pub reload_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub wait_for_processing_before_reload: bool,
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_seconds: u64,
    #[serde(default)]
    pub expose_error_details: bool,
    /// Installer for bundle requirements, e.g. `["pip", "install"]`.
    #[serde(default)]
    pub dependency_command: Option<Vec<String>>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            max_queue_size: default_max_queue_size(),
            process_timeout_seconds: default_timeout_seconds(),
            client_idle_timeout_seconds: default_timeout_seconds(),
            state_file: default_state_file(),
            temp_dir: default_temp_dir(),
            resume_on_startup: true,
            max_resume_attempts: default_max_resume_attempts(),
            clear_temp_on_startup_without_resume: true,
            clear_temp_files_after_processing: true,
            reload_on_change: true,
            reload_interval_seconds: default_reload_interval(),
            wait_for_processing_before_reload: true,
            eviction_interval_seconds: default_eviction_interval(),
            expose_error_details: false,
            dependency_command: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_info: McpServerInfo,
    #[serde(default)]
    pub tools: McpToolsConfig,
    #[serde(default)]
    pub resources: McpResourcesConfig,
    #[serde(default)]
    pub security: McpSecurityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerInfo {
    #[serde(default = "default_mcp_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_mcp_description")]
    pub description: String,
}

impl Default for McpServerInfo {
    fn default() -> Self {
        Self {
            name: default_mcp_name(),
            version: default_version(),
            description: default_mcp_description(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolsConfig {
    #[serde(default = "default_true")]
    pub auto_map_apis: bool,
    /// Capability keys (`bundle/name`) or bundle names not offered as tools.
    #[serde(default)]
    pub excluded_apis: Vec<String>,
}

impl Default for McpToolsConfig {
    fn default() -> Self {
        Self {
            auto_map_apis: true,
            excluded_apis: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResourcesConfig {
    #[serde(default = "default_true")]
    pub expose_queue: bool,
    #[serde(default = "default_true")]
    pub expose_docs: bool,
}

impl Default for McpResourcesConfig {
    fn default() -> Self {
        Self {
            expose_queue: true,
            expose_docs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpSecurityConfig {
    #[serde(default = "default_true")]
    pub require_authentication: bool,
}

impl Default for McpSecurityConfig {
    fn default() -> Self {
        Self {
            require_authentication: true,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    43080
}
fn default_apis_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("custom_apis")]
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_threads() -> usize {
    10
}
fn default_max_queue_size() -> usize {
    100
}
fn default_timeout_seconds() -> u64 {
    300
}
fn default_state_file() -> PathBuf {
    PathBuf::from("processing/state.json")
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("processing/tmp")
}
fn default_max_resume_attempts() -> u32 {
    3
}
fn default_reload_interval() -> u64 {
    120
}
fn default_eviction_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_mcp_name() -> String {
    "nexus".to_string()
}
fn default_version() -> String {
    crate::VERSION.to_string()
}
fn default_mcp_description() -> String {
    "Capability server".to_string()
}

// ============================================================================
// Loading
// ============================================================================

impl NexusConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.processing;
        let checks: [(&'static str, bool); 4] = [
            ("processing.max_threads", p.max_threads == 0),
            ("processing.max_queue_size", p.max_queue_size == 0),
            ("processing.process_timeout_seconds", p.process_timeout_seconds == 0),
            ("processing.reload_interval_seconds", p.reload_interval_seconds == 0),
        ];
        for (field, zero) in checks {
            if zero {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if matches!(&p.dependency_command, Some(cmd) if cmd.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "processing.dependency_command",
                reason: "must name a program".to_string(),
            });
        }
        Ok(())
    }

    /// Whether callers must present a key.
    pub fn auth_enabled(&self) -> bool {
        !self.security.api_keys.is_empty()
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.process_timeout_seconds)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let p = &self.processing;
        QueueSettings {
            max_threads: p.max_threads,
            max_queue_size: p.max_queue_size,
            state_file: p.state_file.clone(),
            temp_dir: p.temp_dir.clone(),
            resume_on_startup: p.resume_on_startup,
            max_resume_attempts: p.max_resume_attempts,
            clear_temp_on_startup_without_resume: p.clear_temp_on_startup_without_resume,
            retention: Duration::from_secs(p.client_idle_timeout_seconds),
            eviction_interval: Duration::from_secs(p.eviction_interval_seconds),
        }
    }

    pub fn reload_settings(&self) -> ReloadSettings {
        ReloadSettings {
            bundle_paths: self.apiserver.apis_dirs.clone(),
            reload_on_change: self.processing.reload_on_change,
            interval: Duration::from_secs(self.processing.reload_interval_seconds),
            wait_for_processing: self.processing.wait_for_processing_before_reload,
        }
    }
}
