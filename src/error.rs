use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

/// External collaborators the subsystem reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NodeRegistry,
    FencingAuthority,
    EtcdClient,
    OperatorStatus,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::NodeRegistry => "node registry",
            SourceKind::FencingAuthority => "fencing authority",
            SourceKind::EtcdClient => "etcd client",
            SourceKind::OperatorStatus => "operator status",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{kind} unavailable: {message}")]
    SourceUnavailable { kind: SourceKind, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    #[error("Disruption refused: {reason}")]
    DisruptionRefused { reason: String },

    #[error("Learner not in sync with leader: {0}")]
    LearnerNotInSync(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn unavailable(kind: SourceKind, message: impl Into<String>) -> Self {
        AppError::SourceUnavailable {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        AppError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Errors that clear up on their own; the next scheduled cycle retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::SourceUnavailable { .. }
                | AppError::Timeout { .. }
                | AppError::DisruptionRefused { .. }
                | AppError::LearnerNotInSync(_)
        )
    }

    /// Errors a human or higher-level operator must observe.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::SafetyViolation(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ConfigError(format!("YAML error: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::SourceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::SafetyViolation(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::DisruptionRefused { reason } => (StatusCode::TOO_MANY_REQUESTS, reason.clone()),
            AppError::LearnerNotInSync(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::MemberNotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalServiceError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
