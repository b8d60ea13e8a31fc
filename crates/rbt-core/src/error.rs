use std::time::Duration;

use thiserror::Error;

use crate::model::{FailureReason, Stage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid url `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected response from {target}: {message}")]
    Malformed { target: String, message: String },
}

impl RemoteError {
    pub(crate) fn malformed(target: impl Into<String>, message: impl ToString) -> Self {
        RemoteError::Malformed {
            target: target.into(),
            message: message.to_string(),
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Transport(TransportError::Cancelled))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(String),

    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: String, message: String },

    #[error("`{input}` is not valid JSON: {message}")]
    Json { input: String, message: String },

    #[error("parameter `{0}` is required by the marker correlation strategy")]
    MissingParam(String),
}

/// Caller-visible failure taxonomy. Every variant is terminal for the
/// invocation.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not connect to the build server: {0}")]
    Connect(String),

    #[error("build server rejected the trigger request: {0}")]
    TriggerRejected(String),

    #[error("{0}")]
    CorrelationFailed(String),

    #[error("{0}")]
    CorrelationTimeout(String),

    #[error("build status returned \"{0}\"; the build has failed")]
    ExecutionFailed(FailureReason),

    #[error("build has not finished and timed out; waited for {} seconds", .waited.as_secs())]
    WaitTimedOut { waited: Duration },

    #[error("{stage} stage cancelled")]
    Cancelled { stage: Stage },
}

impl FlowError {
    /// Classifies a remote call failure by the stage it happened in.
    pub(crate) fn from_remote(err: RemoteError, stage: Stage) -> Self {
        if err.is_cancelled() {
            return FlowError::Cancelled { stage };
        }
        match stage {
            Stage::Trigger => FlowError::TriggerRejected(err.to_string()),
            _ => FlowError::Connect(err.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Config(_) => "config_error",
            FlowError::Connect(_) => "connect_error",
            FlowError::TriggerRejected(_) => "trigger_rejected",
            FlowError::CorrelationFailed(_) => "correlation_failed",
            FlowError::CorrelationTimeout(_) => "correlation_timeout",
            FlowError::ExecutionFailed(_) => "execution_failed",
            FlowError::WaitTimedOut { .. } => "wait_timed_out",
            FlowError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn timed_out_stage(&self) -> Option<Stage> {
        match self {
            FlowError::CorrelationTimeout(_) => Some(Stage::Correlation),
            FlowError::WaitTimedOut { .. } => Some(Stage::Wait),
            _ => None,
        }
    }
}
