//! Container runtime abstraction.
//!
//! The lifecycle manager drives environments through this trait:
//! - Simulated: timer-based transitions, no external processes
//! - Docker Compose: `docker compose up -d` / `down` against the generated file

use crate::config::{LifecycleConfig, RuntimeBackend, TankerConfig};
use crate::environment::Environment;
use crate::{Result, TankerError, log_debug, log_error, log_info};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Runtime details; fails with `RuntimeUnavailable` when unreachable.
    async fn info(&self) -> Result<Value>;

    /// Bring the environment's services up.
    async fn up(&self, environment: &Environment) -> Result<()>;

    /// Tear the environment's services down.
    async fn down(&self, environment: &Environment) -> Result<()>;
}

/// Build the runtime selected by `lifecycle.backend`.
pub fn runtime_for(config: &TankerConfig) -> Arc<dyn ContainerRuntime> {
    match config.lifecycle.backend {
        RuntimeBackend::Simulated => Arc::new(SimulatedRuntime::from_config(&config.lifecycle)),
        RuntimeBackend::DockerCompose => Arc::new(docker_runtime(config)),
    }
}

/// The real Docker CLI runtime, whatever `lifecycle.backend` says. The
/// availability check always goes through this one.
pub fn docker_runtime(config: &TankerConfig) -> DockerComposeRuntime {
    DockerComposeRuntime::new(
        config.compose.file_name.clone(),
        config.lifecycle.command_timeout(),
    )
}

/// Status tracking only: transitions complete after a fixed delay.
pub struct SimulatedRuntime {
    start_delay: Duration,
    stop_delay: Duration,
}

impl SimulatedRuntime {
    pub fn new(start_delay: Duration, stop_delay: Duration) -> Self {
        Self {
            start_delay,
            stop_delay,
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.start_delay(), config.stop_delay())
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn info(&self) -> Result<Value> {
        Ok(json!({
            "runtime": "simulated",
            "startDelayMs": self.start_delay.as_millis() as u64,
            "stopDelayMs": self.stop_delay.as_millis() as u64,
        }))
    }

    async fn up(&self, environment: &Environment) -> Result<()> {
        log_debug!("Simulating start of '{}'", environment.name);
        sleep(self.start_delay).await;
        Ok(())
    }

    async fn down(&self, environment: &Environment) -> Result<()> {
        log_debug!("Simulating stop of '{}'", environment.name);
        sleep(self.stop_delay).await;
        Ok(())
    }
}

/// Drives the `docker compose` CLI against each environment's compose file.
pub struct DockerComposeRuntime {
    binary: String,
    file_name: String,
    command_timeout: Duration,
}

impl DockerComposeRuntime {
    pub fn new(file_name: String, command_timeout: Duration) -> Self {
        Self {
            binary: "docker".to_string(),
            file_name,
            command_timeout,
        }
    }

    /// Use a different docker-compatible executable (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn compose_args(&self, environment: &Environment, action: &[&str]) -> Vec<String> {
        let file = environment.project_path.join(&self.file_name);
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            file.to_string_lossy().into_owned(),
            "--project-directory".to_string(),
            environment.project_path.to_string_lossy().into_owned(),
        ];
        args.extend(action.iter().map(|a| a.to_string()));
        args
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        log_debug!("Running {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(TankerError::RuntimeUnavailable(format!(
                    "Failed to execute {}: {}",
                    self.binary, e
                )));
            }
            Err(_) => {
                return Err(TankerError::Runtime(format!(
                    "{} {} timed out after {}s",
                    self.binary,
                    args.first().map(String::as_str).unwrap_or_default(),
                    self.command_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log_error!("{} exited with {}: {}", self.binary, output.status, stderr);
            return Err(TankerError::Runtime(format!(
                "{} exited with {}: {}",
                self.binary, output.status, stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerComposeRuntime {
    fn name(&self) -> &str {
        "docker-compose"
    }

    async fn info(&self) -> Result<Value> {
        let args = vec![
            "info".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let stdout = self
            .run(&args)
            .await
            .map_err(|e| TankerError::RuntimeUnavailable(e.to_string()))?;
        serde_json::from_str(&stdout).map_err(|e| {
            TankerError::RuntimeUnavailable(format!("Unexpected docker info output: {}", e))
        })
    }

    async fn up(&self, environment: &Environment) -> Result<()> {
        log_info!(
            "Starting compose project '{}' in {}",
            environment.name,
            environment.project_path.display()
        );
        self.run(&self.compose_args(environment, &["up", "-d"])).await?;
        Ok(())
    }

    async fn down(&self, environment: &Environment) -> Result<()> {
        log_info!("Stopping compose project '{}'", environment.name);
        self.run(&self.compose_args(environment, &["down"])).await?;
        Ok(())
    }
}
