use crate::{Result, TankerError, log_debug, templates::Template};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tanker";
const CONFIG_FILE: &str = "config.toml";
const ENVIRONMENTS_FILE: &str = "environments.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TankerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Location of the environments document. Defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeBackend {
    #[default]
    Simulated,
    DockerCompose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub backend: RuntimeBackend,
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
    #[serde(default = "default_stop_delay_ms")]
    pub stop_delay_ms: u64,
    /// Upper bound for a single `docker` invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::default(),
            start_delay_ms: default_start_delay_ms(),
            stop_delay_ms: default_stop_delay_ms(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_file_name")]
    pub file_name: String,
    #[serde(default = "default_compose_version")]
    pub version: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            file_name: default_compose_file_name(),
            version: default_compose_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Enable built-in environment templates
    #[serde(default = "default_true")]
    pub enable_builtin: bool,
    /// Additional templates declared locally
    #[serde(default)]
    pub custom: Vec<Template>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            enable_builtin: true,
            custom: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_start_delay_ms() -> u64 {
    2000
}

fn default_stop_delay_ms() -> u64 {
    1500
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_compose_file_name() -> String {
    "docker-compose.yml".to_string()
}

fn default_compose_version() -> String {
    "3".to_string()
}

impl TankerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| TankerError::io(path, e))?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: TankerConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log_debug!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            log_debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| TankerError::Config(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TankerError::io(parent, e))?;
        }
        fs::write(path, contents).map_err(|e| TankerError::io(path, e))?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Resolved location of the environments document.
    pub fn environments_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join(ENVIRONMENTS_FILE))
            .ok_or_else(|| {
                TankerError::Config(
                    "Cannot determine a data directory; set storage.path".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = TankerConfig::from_str("").unwrap();
        assert_eq!(config.lifecycle.backend, RuntimeBackend::Simulated);
        assert_eq!(config.lifecycle.start_delay(), Duration::from_millis(2000));
        assert_eq!(config.lifecycle.stop_delay(), Duration::from_millis(1500));
        assert_eq!(config.compose.file_name, "docker-compose.yml");
        assert_eq!(config.compose.version, "3");
        assert!(config.templates.enable_builtin);
        assert!(config.templates.custom.is_empty());
    }

    #[test]
    fn parses_overrides_and_custom_templates() {
        let raw = r#"
[storage]
path = "/var/lib/tanker/envs.json"

[lifecycle]
backend = "docker-compose"
start_delay_ms = 10
command_timeout_secs = 30

[templates]
enable_builtin = false

[[templates.custom]]
id = "redis"
name = "Redis"
description = "Standalone cache"
tags = ["Cache"]

[[templates.custom.services]]
name = "redis"
image = "redis:7"
ports = ["6379:6379"]
"#;
        let config = TankerConfig::from_str(raw).unwrap();
        assert_eq!(config.lifecycle.backend, RuntimeBackend::DockerCompose);
        assert_eq!(config.lifecycle.start_delay_ms, 10);
        assert_eq!(config.lifecycle.stop_delay_ms, 1500);
        assert_eq!(config.lifecycle.command_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.environments_path().unwrap(),
            PathBuf::from("/var/lib/tanker/envs.json")
        );
        assert!(!config.templates.enable_builtin);
        assert_eq!(config.templates.custom.len(), 1);
        assert_eq!(config.templates.custom[0].services[0].image, "redis:7");
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = TankerConfig::from_str("[lifecycle]\nbackend = \"podman\"\n").unwrap_err();
        assert!(matches!(err, TankerError::Config(_)));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TankerConfig::default();
        config.lifecycle.stop_delay_ms = 5;
        config.save_to_file(&path).unwrap();

        let loaded = TankerConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.lifecycle.stop_delay_ms, 5);

        let missing = TankerConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.lifecycle.stop_delay_ms, 1500);
    }
}
