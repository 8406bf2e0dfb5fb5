//! Compose file rendering.
//!
//! Turns a template's service list into a `docker-compose.yml` document in the
//! project directory. Writes replace the file wholesale through a temporary
//! sibling, so a reader never observes a half-written document.

use crate::config::ComposeConfig;
use crate::templates::Service;
use crate::{Result, TankerError, log_debug};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: ComposeServices,
}

/// Service blocks keyed by name, kept in template order.
#[derive(Debug, Clone, Default)]
pub struct ComposeServices(Vec<(String, ComposeService)>);

impl ComposeServices {
    pub fn get(&self, name: &str) -> Option<&ComposeService> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }
}

impl Serialize for ComposeServices {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, service) in &self.0 {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeService {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
}

impl From<&Service> for ComposeService {
    fn from(service: &Service) -> Self {
        Self {
            image: service.image.clone(),
            ports: service.ports.clone(),
            volumes: service.volumes.clone(),
            working_dir: non_blank(&service.working_dir),
            command: non_blank(&service.command),
            depends_on: service.depends_on.clone().filter(|d| !d.is_empty()),
            environment: service.environment.clone().filter(|e| !e.is_empty()),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .cloned()
}

pub struct ComposeGenerator {
    file_name: String,
    version: String,
}

impl ComposeGenerator {
    pub fn new(config: &ComposeConfig) -> Self {
        Self {
            file_name: config.file_name.clone(),
            version: config.version.clone(),
        }
    }

    pub fn compose_file_path(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.file_name)
    }

    pub fn build(&self, services: &[Service]) -> ComposeFile {
        ComposeFile {
            version: self.version.clone(),
            services: ComposeServices(
                services
                    .iter()
                    .map(|s| (s.name.clone(), ComposeService::from(s)))
                    .collect(),
            ),
        }
    }

    /// Render the document without touching the filesystem.
    pub fn render(&self, services: &[Service]) -> Result<String> {
        Ok(serde_yaml::to_string(&self.build(services))?)
    }

    /// Write the compose file into `project_path`, replacing any previous one.
    pub fn generate(&self, project_path: &Path, services: &[Service]) -> Result<PathBuf> {
        match fs::metadata(project_path) {
            Ok(meta) if !meta.is_dir() => {
                return Err(TankerError::io(
                    project_path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "project path exists and is not a directory",
                    ),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(TankerError::io(project_path, e)),
        }

        let contents = self.render(services)?;
        let target = self.compose_file_path(project_path);
        write_replacing(&target, contents.as_bytes())?;

        log_debug!(
            "Wrote {} with {} services",
            target.display(),
            services.len()
        );
        Ok(target)
    }
}

impl Default for ComposeGenerator {
    fn default() -> Self {
        Self::new(&ComposeConfig::default())
    }
}

/// Write to a temporary sibling, then rename over `target`.
pub(crate) fn write_replacing(target: &Path, contents: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp, contents).map_err(|e| TankerError::io(&temp, e))?;
    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(TankerError::io(target, e));
    }
    Ok(())
}
