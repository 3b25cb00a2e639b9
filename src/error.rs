use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Malformed artifact {path}: {reason}")]
    MalformedInput { path: PathBuf, reason: String },
    #[error("Directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("Propagation failed: {0}")]
    Propagation(String),
    #[error("Inference failed")]
    Engine { details: String },
    #[error("No response for frame {frame} after {waited:?}")]
    Timeout { frame: u64, waited: Duration },
    #[error("Stale response artifact: expected frame {expected}, found frame {found}")]
    StaleArtifact { expected: u64, found: u64 },
    #[error("Wait for frame {0} was cancelled")]
    Cancelled(u64),
    #[error("Worker task failed: {0}")]
    Worker(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure is reported to the editing client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    ClientError,
    ServerError,
    GatewayTimeout,
}

impl StatusClass {
    pub fn code(&self) -> u16 {
        match self {
            StatusClass::ClientError => 400,
            StatusClass::ServerError => 500,
            StatusClass::GatewayTimeout => 504,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusClass {
        match self {
            AppError::Validation(_) => StatusClass::ClientError,
            AppError::Timeout { .. } | AppError::Cancelled(_) => StatusClass::GatewayTimeout,
            _ => StatusClass::ServerError,
        }
    }

    /// Short headline used in the `error` field of a failure response.
    pub fn headline(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Missing required parameters",
            AppError::Engine { .. } | AppError::Propagation(_) => "Inference failed",
            AppError::Timeout { .. } => "Inference timed out",
            AppError::Cancelled(_) => "Inference cancelled",
            AppError::StaleArtifact { .. } | AppError::MalformedInput { .. } => {
                "Invalid inference output"
            }
            _ => "Internal server error",
        }
    }

    /// Diagnostic text for the `details` field. Engine output is returned verbatim.
    pub fn details(&self) -> String {
        match self {
            AppError::Engine { details } => details.clone(),
            other => other.to_string(),
        }
    }

    /// Timeouts may succeed on a later attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_a_client_error() {
        let err = AppError::Validation("frameNumber: required".to_string());
        assert_eq!(err.status(), StatusClass::ClientError);
        assert_eq!(err.status().code(), 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn engine_details_are_verbatim() {
        let err = AppError::Engine {
            details: "Traceback: model exploded\n".to_string(),
        };
        assert_eq!(err.details(), "Traceback: model exploded\n");
        assert_eq!(err.status(), StatusClass::ServerError);
    }

    #[test]
    fn timeout_is_distinct_and_retryable() {
        let err = AppError::Timeout {
            frame: 7,
            waited: Duration::from_millis(50),
        };
        assert_eq!(err.status(), StatusClass::GatewayTimeout);
        assert!(err.is_retryable());
    }
}
