//! Error types for course-pilot.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reported by the remote platform client or the captcha service.
///
/// The split between transport and application failures drives the retry
/// policy of a study session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Platform rejected request: {message}")]
    Api { message: String, needs_captcha: bool },
}

impl ClientError {
    /// Application error without a captcha demand.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            needs_captcha: false,
        }
    }

    /// Application error asking for a captcha code on the next attempt.
    pub fn captcha_required(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            needs_captcha: true,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn needs_captcha(&self) -> bool {
        matches!(
            self,
            Self::Api {
                needs_captcha: true,
                ..
            }
        )
    }
}

/// Reasons a (user, course) task ends Failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Login failed for {user}: {reason}")]
    LoginFailed { user: String, reason: String },

    #[error("Failed to list chapters of course {course_id}: {reason}")]
    ChaptersFailed { course_id: i64, reason: String },

    #[error("Stopped by cancellation request")]
    Cancelled,

    #[error("{aborted} of {total} nodes aborted")]
    NodesAborted { aborted: usize, total: usize },

    #[error("Node {node_id} restarted {restarts} times without completing")]
    RestartLimit { node_id: i64, restarts: u32 },

    #[error("Worker panicked while running the task")]
    Panicked,
}

/// Control-plane errors, mapped onto HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("No run is in progress")]
    NotRunning,

    #[error("No users configured")]
    NoUsers,

    #[error("Course not found")]
    CourseNotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ControlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::CourseNotFound => StatusCode::NOT_FOUND,
            Self::NoUsers | Self::Client(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
