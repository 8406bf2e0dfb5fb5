//! Environment lifecycle management.
//!
//! The manager owns environment records end to end: it validates creation
//! requests against the template catalog, writes the compose file, registers
//! the record, and drives start/stop transitions through the container
//! runtime. Transitions are fire-and-forget: callers get an acknowledgement
//! right away and observe the outcome on the event bus.
//!
//! Every start/stop/delete issues a fresh ticket for its environment id.
//! Runtime calls for one id run strictly in issue order, and a call whose
//! ticket was superseded before its turn came is skipped. A completing
//! transition only applies its effect while its ticket is still the latest
//! one, so overlapping requests settle on the last one issued.

use crate::compose::{ComposeGenerator, write_replacing};
use crate::config::TankerConfig;
use crate::environment::{Environment, EnvironmentStatus};
use crate::events::{EventBus, LifecycleEvent};
use crate::runtime::{ContainerRuntime, runtime_for};
use crate::store::{EnvironmentStore, JsonFileStore};
use crate::templates::{Template, TemplateCatalog};
use crate::{Result, TankerError, log_debug, log_error, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvironment {
    pub name: String,
    pub template_id: String,
    pub project_path: PathBuf,
}

/// Immediate reply to a lifecycle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    pub message: String,
}

impl Acknowledgement {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Start => write!(f, "start"),
            Transition::Stop => write!(f, "stop"),
        }
    }
}

/// Observable state, including the transient in-flight phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl From<EnvironmentStatus> for LifecyclePhase {
    fn from(status: EnvironmentStatus) -> Self {
        match status {
            EnvironmentStatus::Stopped => LifecyclePhase::Stopped,
            EnvironmentStatus::Running => LifecyclePhase::Running,
            EnvironmentStatus::Error => LifecyclePhase::Error,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    token: u64,
    transition: Transition,
}

#[derive(Default)]
struct Registry {
    // Latest issued ticket per environment; guards every status write.
    tickets: HashMap<Uuid, Ticket>,
    // Completion signal of the most recently issued runtime call per environment.
    tails: HashMap<Uuid, oneshot::Receiver<()>>,
    deleting: HashSet<Uuid>,
}

/// A transition's place in its environment's queue of runtime calls.
/// Dropping it lets the next queued call proceed.
struct Turn {
    token: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    async fn wait_previous(&mut self) {
        if let Some(previous) = self.previous.take() {
            // A dropped sender also means the previous call is over.
            let _ = previous.await;
        }
    }
}

struct Inner {
    catalog: Arc<TemplateCatalog>,
    store: Arc<dyn EnvironmentStore>,
    runtime: Arc<dyn ContainerRuntime>,
    compose: ComposeGenerator,
    events: EventBus,
    registry: Mutex<Registry>,
    next_token: AtomicU64,
}

#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        store: Arc<dyn EnvironmentStore>,
        runtime: Arc<dyn ContainerRuntime>,
        compose: ComposeGenerator,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                store,
                runtime,
                compose,
                events,
                registry: Mutex::new(Registry::default()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Wire up the catalog, JSON store, runtime and compose generator from configuration.
    pub fn from_config(config: &TankerConfig) -> Result<Self> {
        let catalog = Arc::new(TemplateCatalog::from_config(&config.templates)?);
        let store = Arc::new(JsonFileStore::new(config.environments_path()?));
        let runtime = runtime_for(config);
        log_debug!(
            "Lifecycle manager using {} runtime, store at {}",
            runtime.name(),
            store.path().display()
        );
        Ok(Self::new(
            catalog,
            store,
            runtime,
            ComposeGenerator::new(&config.compose),
            EventBus::new(),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn list_templates(&self) -> Vec<Template> {
        self.inner.catalog.list_templates()
    }

    pub fn list_environments(&self) -> Result<Vec<Environment>> {
        self.inner.store.list()
    }

    pub fn get_environment(&self, id: Uuid) -> Result<Environment> {
        self.inner.store.get(id)
    }

    /// Current phase of an environment, reporting in-flight transitions.
    pub async fn phase(&self, id: Uuid) -> Result<LifecyclePhase> {
        let environment = self.inner.store.get(id)?;
        let registry = self.inner.registry.lock().await;
        if registry.deleting.contains(&id) {
            return Ok(LifecyclePhase::Stopping);
        }
        Ok(match registry.tickets.get(&id).map(|t| t.transition) {
            Some(Transition::Start) => LifecyclePhase::Starting,
            Some(Transition::Stop) => LifecyclePhase::Stopping,
            None => environment.status.into(),
        })
    }

    /// Register a new environment from a template.
    ///
    /// Either the record is appended and the compose file exists, or
    /// neither: anything this call put on disk is rolled back on failure,
    /// including a compose file it overwrote.
    pub async fn create(&self, request: CreateEnvironment) -> Result<Environment> {
        let CreateEnvironment {
            name,
            template_id,
            project_path,
        } = request;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(TankerError::Validation(
                "Environment name is required".to_string(),
            ));
        }
        if template_id.trim().is_empty() {
            return Err(TankerError::Validation("Template id is required".to_string()));
        }
        if project_path.as_os_str().is_empty() {
            return Err(TankerError::Validation(
                "Project path is required".to_string(),
            ));
        }
        if !project_path.is_absolute() {
            return Err(TankerError::Validation(format!(
                "Project path '{}' must be absolute",
                project_path.display()
            )));
        }

        let template = self.inner.catalog.get_template(&template_id)?;
        let environment = Environment::new(name, template_id.clone(), project_path);

        let compose_path = self
            .inner
            .compose
            .compose_file_path(&environment.project_path);
        let previous_compose = tokio::fs::read(&compose_path).await.ok();

        let created_root = first_missing_ancestor(&environment.project_path);
        tokio::fs::create_dir_all(&environment.project_path)
            .await
            .map_err(|e| TankerError::io(&environment.project_path, e))?;

        let registered = self
            .inner
            .compose
            .generate(&environment.project_path, &template.services)
            .and_then(|_| self.inner.store.append(environment.clone()));

        if let Err(e) = registered {
            log_error!(
                "Failed to create environment '{}': {}",
                environment.name,
                e
            );
            rollback(created_root.as_deref(), &compose_path, previous_compose).await;
            return Err(e);
        }

        log_info!(
            "Created environment '{}' ({}) from template '{}' at {}",
            environment.name,
            environment.id,
            template_id,
            environment.project_path.display()
        );
        Ok(environment)
    }

    /// Begin bringing an environment up. Completion arrives as an
    /// `environment-updated` event.
    pub async fn start(&self, id: Uuid) -> Result<Acknowledgement> {
        self.begin(id, Transition::Start).await?;
        Ok(Acknowledgement::ok("Environment starting..."))
    }

    /// Begin taking an environment down. Completion arrives as an
    /// `environment-updated` event.
    pub async fn stop(&self, id: Uuid) -> Result<Acknowledgement> {
        self.begin(id, Transition::Stop).await?;
        Ok(Acknowledgement::ok("Environment stopping..."))
    }

    /// Remove an environment, stopping it first (and waiting for that)
    /// when it is running or has a transition in flight. Start and stop
    /// requests are refused while the deletion is in progress.
    pub async fn delete(&self, id: Uuid) -> Result<Acknowledgement> {
        let environment = self.inner.store.get(id)?;

        let (mut turn, in_flight) = {
            let mut registry = self.inner.registry.lock().await;
            if !registry.deleting.insert(id) {
                return Err(TankerError::EnvironmentNotFound(id.to_string()));
            }
            let in_flight = registry.tickets.get(&id).map(|t| t.transition);
            (self.issue(&mut registry, id, Transition::Stop), in_flight)
        };

        let mut failure = None;
        if environment.is_running() || in_flight.is_some() {
            log_info!(
                "Stopping environment '{}' before deletion",
                environment.name
            );
            if let Some(outcome) = self.run(Transition::Stop, &environment, &mut turn).await {
                failure = outcome.as_ref().err().map(ToString::to_string);
                self.complete(id, Transition::Stop, turn.token, outcome).await;
            }
        } else {
            turn.wait_previous().await;
        }

        let mut registry = self.inner.registry.lock().await;
        registry.deleting.remove(&id);
        if let Some(message) = failure {
            return Err(TankerError::Runtime(format!(
                "Could not stop environment '{}' before deletion: {}",
                environment.name, message
            )));
        }

        registry.tickets.remove(&id);
        registry.tails.remove(&id);
        self.inner.store.remove(id)?;
        self.inner
            .events
            .publish(LifecycleEvent::EnvironmentDeleted { id });
        drop(registry);

        log_info!("Deleted environment '{}' ({})", environment.name, id);
        Ok(Acknowledgement::ok("Environment deleted"))
    }

    async fn begin(&self, id: Uuid, transition: Transition) -> Result<()> {
        let environment = self.inner.store.get(id)?;
        let mut turn = {
            let mut registry = self.inner.registry.lock().await;
            if registry.deleting.contains(&id) {
                return Err(TankerError::EnvironmentNotFound(id.to_string()));
            }
            self.issue(&mut registry, id, transition)
        };

        log_info!(
            "Environment '{}' ({}): {} requested",
            environment.name,
            id,
            transition
        );

        let manager = self.clone();
        tokio::spawn(async move {
            if let Some(outcome) = manager.run(transition, &environment, &mut turn).await {
                manager.complete(id, transition, turn.token, outcome).await;
            }
        });
        Ok(())
    }

    fn issue(&self, registry: &mut Registry, id: Uuid, transition: Transition) -> Turn {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let (done, tail) = oneshot::channel();
        let previous = registry.tails.insert(id, tail);
        if let Some(superseded) = registry.tickets.insert(id, Ticket { token, transition }) {
            log_debug!(
                "{} of {} supersedes pending {}",
                transition,
                id,
                superseded.transition
            );
        }
        Turn {
            token,
            previous,
            _done: done,
        }
    }

    /// Wait for the environment's earlier runtime calls, then perform this
    /// one unless a newer request has replaced it in the meantime.
    async fn run(
        &self,
        transition: Transition,
        environment: &Environment,
        turn: &mut Turn,
    ) -> Option<Result<()>> {
        turn.wait_previous().await;

        let current = {
            let registry = self.inner.registry.lock().await;
            registry.tickets.get(&environment.id).map(|t| t.token) == Some(turn.token)
        };
        if !current {
            log_debug!("Skipping superseded {} of {}", transition, environment.id);
            return None;
        }

        Some(match transition {
            Transition::Start => self.inner.runtime.up(environment).await,
            Transition::Stop => self.inner.runtime.down(environment).await,
        })
    }

    /// Apply a finished transition if it is still the latest request for
    /// the environment, then publish the updated record.
    async fn complete(
        &self,
        id: Uuid,
        transition: Transition,
        token: u64,
        outcome: Result<()>,
    ) -> Option<Environment> {
        let mut registry = self.inner.registry.lock().await;
        match registry.tickets.get(&id) {
            Some(ticket) if ticket.token == token => {
                registry.tickets.remove(&id);
            }
            _ => {
                log_debug!("Discarding superseded {} of {}", transition, id);
                return None;
            }
        }

        let updated = self.inner.store.update(id, &mut |env| match &outcome {
            Ok(()) => match transition {
                Transition::Start => env.mark_running(),
                Transition::Stop => env.mark_stopped(),
            },
            Err(e) => env.mark_error(e.to_string()),
        });

        match updated {
            Ok(environment) => {
                match &outcome {
                    Ok(()) => log_info!(
                        "Environment '{}' is now {}",
                        environment.name,
                        environment.status
                    ),
                    Err(e) => log_error!(
                        "Environment '{}' failed to {}: {}",
                        environment.name,
                        transition,
                        e
                    ),
                }
                self.inner.events.publish(LifecycleEvent::EnvironmentUpdated {
                    environment: environment.clone(),
                });
                Some(environment)
            }
            Err(e) => {
                log_warn!("Could not record {} of {}: {}", transition, id, e);
                None
            }
        }
    }
}

/// Topmost directory in `path` that does not exist yet.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

async fn rollback(created_root: Option<&Path>, compose_path: &Path, previous: Option<Vec<u8>>) {
    if let Some(root) = created_root {
        if let Err(e) = tokio::fs::remove_dir_all(root).await {
            log_warn!("Rollback could not remove {}: {}", root.display(), e);
        }
    } else if let Some(contents) = previous {
        if let Err(e) = write_replacing(compose_path, &contents) {
            log_warn!("Rollback could not restore {}: {}", compose_path.display(), e);
        }
    } else if compose_path.exists() {
        if let Err(e) = tokio::fs::remove_file(compose_path).await {
            log_warn!("Rollback could not remove {}: {}", compose_path.display(), e);
        }
    }
}
