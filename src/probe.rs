use crate::runtime::ContainerRuntime;
use crate::{log_info, log_warn};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Outcome of a runtime reachability check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Availability {
    pub fn available(info: Value) -> Self {
        Self {
            available: true,
            info: Some(info),
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            info: None,
            error: Some(error.into()),
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.available {
            writeln!(f, "Container runtime: available")?;
            if let Some(version) = self
                .info
                .as_ref()
                .and_then(|info| info.get("ServerVersion"))
                .and_then(Value::as_str)
            {
                writeln!(f, "  server version: {}", version)?;
            }
            Ok(())
        } else {
            writeln!(
                f,
                "Container runtime: unavailable ({})",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Ask the runtime for its details. Never fails: errors become an
/// unavailable result carrying the message.
pub async fn check_availability(runtime: &dyn ContainerRuntime) -> Availability {
    match runtime.info().await {
        Ok(info) => {
            log_info!("Container runtime '{}' is available", runtime.name());
            Availability::available(info)
        }
        Err(e) => {
            log_warn!("Container runtime '{}' not available: {}", runtime.name(), e);
            Availability::unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::runtime::SimulatedRuntime;
    use crate::{Result, TankerError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl ContainerRuntime for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn info(&self) -> Result<Value> {
            Err(TankerError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ))
        }

        async fn up(&self, _environment: &Environment) -> Result<()> {
            Ok(())
        }

        async fn down(&self, _environment: &Environment) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_become_unavailable_results() {
        let result = check_availability(&Unreachable).await;
        assert!(!result.available);
        assert!(result.info.is_none());
        assert!(result.error.unwrap().contains("Docker daemon"));
    }

    #[tokio::test]
    async fn reachable_runtime_reports_info() {
        let runtime = SimulatedRuntime::new(Duration::ZERO, Duration::ZERO);
        let result = check_availability(&runtime).await;
        assert!(result.available);
        assert_eq!(result.info.unwrap()["runtime"], "simulated");
    }

    #[test]
    fn serialized_shape_carries_info_or_error() {
        let ok = serde_json::to_value(Availability::available(json!({"ServerVersion": "24.0"})))
            .unwrap();
        assert_eq!(ok, json!({"available": true, "info": {"ServerVersion": "24.0"}}));

        let down = serde_json::to_value(Availability::unavailable("no socket")).unwrap();
        assert_eq!(down, json!({"available": false, "error": "no socket"}));
    }

    #[test]
    fn display_is_readable() {
        let printed = Availability::available(json!({"ServerVersion": "24.0.7"})).to_string();
        assert!(printed.contains("available"));
        assert!(printed.contains("24.0.7"));

        let printed = Availability::unavailable("permission denied").to_string();
        assert!(printed.contains("unavailable (permission denied)"));
    }
}
