//! Error types for the dispatcher.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Slack error: {0}")]
    Slack(#[from] SlackError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Slack Web API / Socket Mode errors.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Slack API call {method} failed: {reason}")]
    Api { method: String, reason: String },

    #[error("Socket Mode connection failed: {0}")]
    SocketMode(String),

    #[error("Invalid event payload: {0}")]
    InvalidEvent(String),
}

impl From<reqwest::Error> for SlackError {
    fn from(err: reqwest::Error) -> Self {
        SlackError::Http(err.to_string())
    }
}

/// External agent invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Credential store errors. These never propagate past the sync component;
/// they are logged and swallowed there.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential store request failed: {0}")]
    Http(String),

    #[error("Credential store rejected {op} for key {key}")]
    Rejected { op: String, key: String },
}

/// Scheduler job errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job aborted before completing")]
    Aborted,
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;
