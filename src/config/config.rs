use crate::config::presets::{LanguageRegistry, FILE_PLACEHOLDER};
use crate::config::types::{ExecutionMode, Result, WarmboxError};
/// Configuration loading from config.json
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Container engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Socket path, `unix://`, `tcp://` or `http://` endpoint; local defaults when unset
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// Pull missing images before warming the pool
    pub pull_images: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 120,
            pull_images: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Warm sandboxes created per language at start-up
    pub size: usize,
    pub languages: Vec<String>,
    /// Free sandboxes idle for longer than this are evicted (disabled when unset)
    pub idle_timeout_secs: Option<u64>,
    pub reap_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            languages: vec![
                "python".to_string(),
                "golang".to_string(),
                "javascript".to_string(),
            ],
            idle_timeout_secs: None,
            reap_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Directory inside the sandbox that receives the source file
    pub workspace: String,
    /// Per-request deadline; unbounded when unset
    pub timeout_ms: Option<u64>,
    pub mode: ExecutionMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workspace: "/app".to_string(),
            timeout_ms: None,
            mode: ExecutionMode::Pooled,
        }
    }
}

/// Language entry from config.json; overrides or extends the built-in registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,
}

/// Full config.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmboxConfig {
    pub engine: EngineConfig,
    pub pool: PoolConfig,
    pub execution: ExecutionConfig,
    pub languages: BTreeMap<String, LanguageEntry>,
}

impl WarmboxConfig {
    /// Load configuration from config.json file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WarmboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: WarmboxConfig = serde_json::from_str(&config_content)
            .map_err(|e| WarmboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load `path` when given, otherwise ./config.json when present, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        let config_path = std::env::current_dir()
            .map_err(|e| WarmboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join("config.json");

        if config_path.exists() {
            log::info!("Loading configuration from {}", config_path.display());
            Self::load_from_file(config_path)
        } else {
            log::debug!("config.json not found in current directory, using defaults");
            Ok(Self::default())
        }
    }

    /// Built-in registry with the `languages` section applied
    pub fn build_registry(&self) -> Result<LanguageRegistry> {
        let mut registry = LanguageRegistry::new();
        registry.apply_entries(&self.languages)?;
        Ok(registry)
    }

    /// Check the configuration against the registry it produces
    pub fn validate(&self) -> Result<LanguageRegistry> {
        for (tag, entry) in &self.languages {
            if let Some(run) = &entry.run {
                if !run.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
                    return Err(WarmboxError::Config(format!(
                        "language {}: run command must reference {}",
                        tag, FILE_PLACEHOLDER
                    )));
                }
            }
        }

        let registry = self.build_registry()?;

        for language in &self.pool.languages {
            if !registry.has(language) {
                return Err(WarmboxError::Config(format!(
                    "pool language '{}' is not registered",
                    language
                )));
            }
        }

        if !self.execution.workspace.starts_with('/') {
            return Err(WarmboxError::Config(format!(
                "workspace '{}' must be an absolute path",
                self.execution.workspace
            )));
        }

        if self.engine.timeout_secs == 0 {
            return Err(WarmboxError::Config(
                "engine.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(registry)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.execution.timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.pool.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.pool.reap_interval_secs.max(1))
    }
}
