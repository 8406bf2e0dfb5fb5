use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TankerError {
    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Environment '{0}' not found")]
    EnvironmentNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error classes exposed to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Io,
    RuntimeUnavailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::RuntimeUnavailable => "runtime-unavailable",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

impl TankerError {
    /// Attach the offending path to an IO failure.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TankerError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TankerError::TemplateNotFound(_) | TankerError::EnvironmentNotFound(_) => {
                ErrorKind::NotFound
            }
            TankerError::Validation(_) => ErrorKind::Validation,
            TankerError::Io { .. } => ErrorKind::Io,
            TankerError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            TankerError::Runtime(_) | TankerError::Serialization(_) | TankerError::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<toml::de::Error> for TankerError {
    fn from(err: toml::de::Error) -> Self {
        TankerError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TankerError {
    fn from(err: serde_json::Error) -> Self {
        TankerError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TankerError {
    fn from(err: serde_yaml::Error) -> Self {
        TankerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            TankerError::TemplateNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TankerError::EnvironmentNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TankerError::Validation("name".into()).kind(),
            ErrorKind::Validation
        );
        let io = TankerError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("/tmp/x"));
    }

    #[test]
    fn messages_are_readable() {
        let err = TankerError::TemplateNotFound("rails".into());
        assert_eq!(err.to_string(), "Template 'rails' not found");
        assert_eq!(ErrorKind::RuntimeUnavailable.to_string(), "runtime-unavailable");
    }
}
