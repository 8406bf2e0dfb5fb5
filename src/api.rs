//! Request/response surface consumed by UI shells.
//!
//! Requests are JSON objects tagged by operation name, e.g.
//! `{"op": "start-environment", "environmentId": "..."}`. Failures are
//! reported in-band as `{"error": {"kind": ..., "message": ...}}`.

use crate::environment::Environment;
use crate::error::ErrorKind;
use crate::lifecycle::{Acknowledgement, CreateEnvironment, LifecycleManager, LifecyclePhase};
use crate::probe::{Availability, check_availability};
use crate::runtime::ContainerRuntime;
use crate::templates::Template;
use crate::{Result, TankerError, log_debug, log_warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    GetTemplates,
    GetEnvironments,
    CreateEnvironment(CreateEnvironment),
    StartEnvironment {
        #[serde(rename = "environmentId")]
        environment_id: Uuid,
    },
    StopEnvironment {
        #[serde(rename = "environmentId")]
        environment_id: Uuid,
    },
    DeleteEnvironment {
        #[serde(rename = "environmentId")]
        environment_id: Uuid,
    },
    /// Includes the transient `starting`/`stopping` phases.
    GetEnvironmentPhase {
        #[serde(rename = "environmentId")]
        environment_id: Uuid,
    },
    SelectProjectDirectory,
    CheckDocker,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::GetTemplates => "get-templates",
            Request::GetEnvironments => "get-environments",
            Request::CreateEnvironment(_) => "create-environment",
            Request::StartEnvironment { .. } => "start-environment",
            Request::StopEnvironment { .. } => "stop-environment",
            Request::DeleteEnvironment { .. } => "delete-environment",
            Request::GetEnvironmentPhase { .. } => "get-environment-phase",
            Request::SelectProjectDirectory => "select-project-directory",
            Request::CheckDocker => "check-docker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Templates(Vec<Template>),
    Environments(Vec<Environment>),
    Environment(Environment),
    Ack(Acknowledgement),
    Phase { phase: LifecyclePhase },
    /// `null` when the user cancelled the picker.
    Directory(Option<PathBuf>),
    Availability(Availability),
    Error { error: ErrorBody },
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

impl From<&TankerError> for Response {
    fn from(err: &TankerError) -> Self {
        Response::Error {
            error: ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// One line of `serve` output answering a request.
#[derive(Debug, Serialize)]
pub struct Reply<'a> {
    pub op: &'a str,
    pub response: &'a Response,
}

/// Native folder chooser, supplied by whichever shell hosts the surface.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// `None` means the user cancelled.
    async fn pick_directory(&self) -> Result<Option<PathBuf>>;
}

/// Always answers with the same choice. Headless shells use this with a
/// directory given on the command line, or `None` to report cancellation.
#[derive(Debug, Clone, Default)]
pub struct FixedPicker {
    choice: Option<PathBuf>,
}

impl FixedPicker {
    pub fn new(choice: Option<PathBuf>) -> Self {
        Self { choice }
    }

    pub fn cancelled() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryPicker for FixedPicker {
    async fn pick_directory(&self) -> Result<Option<PathBuf>> {
        Ok(self.choice.clone())
    }
}

pub struct RequestHandler {
    manager: LifecycleManager,
    picker: Arc<dyn DirectoryPicker>,
    // Answers check-docker; independent of the lifecycle backend.
    docker: Arc<dyn ContainerRuntime>,
}

impl RequestHandler {
    pub fn new(
        manager: LifecycleManager,
        picker: Arc<dyn DirectoryPicker>,
        docker: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            manager,
            picker,
            docker,
        }
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    /// Answer a request. Errors come back as `Response::Error`.
    pub async fn handle(&self, request: Request) -> Response {
        let op = request.op();
        log_debug!("Handling {}", op);
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                log_warn!("{} failed: {}", op, e);
                Response::from(&e)
            }
        }
    }

    /// Parse and answer one JSON request line, producing one JSON reply line.
    pub async fn handle_line(&self, line: &str) -> Result<String> {
        let (op, response) = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                let op = request.op();
                (op, self.handle(request).await)
            }
            Err(e) => {
                let err = TankerError::Validation(format!("Malformed request: {}", e));
                log_warn!("{}", err);
                ("invalid", Response::from(&err))
            }
        };
        Ok(serde_json::to_string(&Reply {
            op,
            response: &response,
        })?)
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        Ok(match request {
            Request::GetTemplates => Response::Templates(self.manager.list_templates()),
            Request::GetEnvironments => Response::Environments(self.manager.list_environments()?),
            Request::CreateEnvironment(create) => {
                Response::Environment(self.manager.create(create).await?)
            }
            Request::StartEnvironment { environment_id } => {
                Response::Ack(self.manager.start(environment_id).await?)
            }
            Request::StopEnvironment { environment_id } => {
                Response::Ack(self.manager.stop(environment_id).await?)
            }
            Request::DeleteEnvironment { environment_id } => {
                Response::Ack(self.manager.delete(environment_id).await?)
            }
            Request::GetEnvironmentPhase { environment_id } => Response::Phase {
                phase: self.manager.phase(environment_id).await?,
            },
            Request::SelectProjectDirectory => {
                Response::Directory(self.picker.pick_directory().await?)
            }
            Request::CheckDocker => {
                Response::Availability(check_availability(self.docker.as_ref()).await)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeGenerator;
    use crate::events::EventBus;
    use crate::runtime::{DockerComposeRuntime, SimulatedRuntime};
    use crate::store::MemoryStore;
    use crate::templates::TemplateCatalog;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Docker CLI runtime pointed at a binary that does not exist.
    fn absent_docker() -> Arc<dyn ContainerRuntime> {
        Arc::new(
            DockerComposeRuntime::new("docker-compose.yml".into(), Duration::from_secs(5))
                .with_binary("tanker-no-such-docker-binary"),
        )
    }

    fn handler(picker: FixedPicker) -> RequestHandler {
        handler_with_docker(picker, absent_docker())
    }

    fn handler_with_docker(
        picker: FixedPicker,
        docker: Arc<dyn ContainerRuntime>,
    ) -> RequestHandler {
        let manager = LifecycleManager::new(
            Arc::new(TemplateCatalog::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedRuntime::new(
                Duration::from_millis(5),
                Duration::from_millis(5),
            )),
            ComposeGenerator::default(),
            EventBus::new(),
        );
        RequestHandler::new(manager, Arc::new(picker), docker)
    }

    #[test]
    fn requests_parse_from_operation_tags() {
        let id = Uuid::new_v4();
        let parsed: Request = serde_json::from_value(json!({
            "op": "start-environment",
            "environmentId": id.to_string(),
        }))
        .unwrap();
        assert_eq!(parsed, Request::StartEnvironment { environment_id: id });

        let parsed: Request = serde_json::from_value(json!({
            "op": "create-environment",
            "name": "demo",
            "templateId": "node-react",
            "projectPath": "/srv/demo",
        }))
        .unwrap();
        match parsed {
            Request::CreateEnvironment(create) => {
                assert_eq!(create.template_id, "node-react");
                assert_eq!(create.project_path, PathBuf::from("/srv/demo"));
            }
            other => panic!("unexpected request {:?}", other),
        }

        let parsed: Request = serde_json::from_str(r#"{"op":"get-templates"}"#).unwrap();
        assert_eq!(parsed.op(), "get-templates");
    }

    #[tokio::test]
    async fn errors_are_reported_in_band() {
        let handler = handler(FixedPicker::cancelled());
        let response = handler
            .handle(Request::StartEnvironment {
                environment_id: Uuid::new_v4(),
            })
            .await;
        assert!(response.is_error());

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"]["kind"], "not-found");
        assert!(value["error"]["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn create_then_list_through_the_surface() {
        let dir = tempdir().unwrap();
        let handler = handler(FixedPicker::cancelled());

        let response = handler
            .handle(Request::CreateEnvironment(CreateEnvironment {
                name: "demo".into(),
                template_id: "lamp".into(),
                project_path: dir.path().join("demo"),
            }))
            .await;
        let created = match response {
            Response::Environment(env) => env,
            other => panic!("unexpected response {:?}", other),
        };

        match handler.handle(Request::GetEnvironments).await {
            Response::Environments(all) => assert_eq!(all, vec![created]),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn picker_result_passes_through() {
        let cancelled = handler(FixedPicker::cancelled());
        let value = serde_json::to_value(cancelled.handle(Request::SelectProjectDirectory).await)
            .unwrap();
        assert_eq!(value, Value::Null);

        let chosen = handler(FixedPicker::new(Some(PathBuf::from("/home/dev/app"))));
        let value =
            serde_json::to_value(chosen.handle(Request::SelectProjectDirectory).await).unwrap();
        assert_eq!(value, json!("/home/dev/app"));
    }

    #[tokio::test]
    async fn lines_round_through_the_handler() {
        let handler = handler(FixedPicker::cancelled());

        let reply: Value = serde_json::from_str(
            &handler
                .handle_line(r#"{"op":"check-docker"}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["op"], "check-docker");
        assert_eq!(reply["response"]["available"], false);
        assert!(reply["response"]["error"].is_string());

        let reply: Value =
            serde_json::from_str(&handler.handle_line("{not json").await.unwrap()).unwrap();
        assert_eq!(reply["op"], "invalid");
        assert_eq!(reply["response"]["error"]["kind"], "validation");

        let reply: Value = serde_json::from_str(
            &handler
                .handle_line(r#"{"op":"get-templates"}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["response"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn check_docker_ignores_the_lifecycle_backend() {
        // The lifecycle runs simulated, but Docker itself is missing.
        let missing = handler(FixedPicker::cancelled());
        match missing.handle(Request::CheckDocker).await {
            Response::Availability(availability) => {
                assert!(!availability.available);
                assert!(availability.info.is_none());
            }
            other => panic!("unexpected response {:?}", other),
        }

        let reachable = handler_with_docker(
            FixedPicker::cancelled(),
            Arc::new(SimulatedRuntime::new(Duration::ZERO, Duration::ZERO)),
        );
        match reachable.handle(Request::CheckDocker).await {
            Response::Availability(availability) => assert!(availability.available),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn phase_is_reported_through_the_surface() {
        let dir = tempdir().unwrap();
        let handler = handler(FixedPicker::cancelled());
        let env = handler
            .manager()
            .create(CreateEnvironment {
                name: "demo".into(),
                template_id: "lamp".into(),
                project_path: dir.path().join("demo"),
            })
            .await
            .unwrap();

        let reply: Value = serde_json::from_str(
            &handler
                .handle_line(&format!(
                    r#"{{"op":"get-environment-phase","environmentId":"{}"}}"#,
                    env.id
                ))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["op"], "get-environment-phase");
        assert_eq!(reply["response"], json!({"phase": "stopped"}));

        handler.manager().start(env.id).await.unwrap();
        let response = handler
            .handle(Request::GetEnvironmentPhase {
                environment_id: env.id,
            })
            .await;
        assert_eq!(
            response,
            Response::Phase {
                phase: LifecyclePhase::Starting
            }
        );
    }
}
