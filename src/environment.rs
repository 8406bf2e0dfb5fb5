use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Persisted status of an environment. The transient `starting` and
/// `stopping` phases live only inside the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Stopped,
    Running,
    Error,
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentStatus::Stopped => write!(f, "stopped"),
            EnvironmentStatus::Running => write!(f, "running"),
            EnvironmentStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: Uuid,
    pub name: String,
    pub template_id: String,
    pub project_path: PathBuf,
    pub status: EnvironmentStatus,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Environment {
    pub fn new(name: String, template_id: String, project_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            template_id,
            project_path,
            status: EnvironmentStatus::Stopped,
            created_at: now,
            last_used: now,
            last_error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = EnvironmentStatus::Running;
        self.last_error = None;
        self.touch();
    }

    pub fn mark_stopped(&mut self) {
        self.status = EnvironmentStatus::Stopped;
        self.last_error = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = EnvironmentStatus::Error;
        self.last_error = Some(message.into());
    }

    /// Refresh `last_used`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_used {
            self.last_used = now;
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, EnvironmentStatus::Running)
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}
