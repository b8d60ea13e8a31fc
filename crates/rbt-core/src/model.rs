use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::FlowError;

/// A single trigger parameter. Sent to the build server as a form field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Number(value) => write!(f, "{value}"),
            ParamValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value.into())
    }
}

pub type TriggerParams = BTreeMap<String, ParamValue>;

#[derive(Clone, Debug)]
pub struct TriggerRequest {
    job_name: String,
    params: TriggerParams,
    correlation_token: Option<String>,
}

impl TriggerRequest {
    pub fn new(
        job_name: impl Into<String>,
        params: TriggerParams,
        correlation_token: Option<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            params,
            correlation_token,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn params(&self) -> &TriggerParams {
        &self.params
    }

    pub fn correlation_token(&self) -> Option<&str> {
        self.correlation_token.as_deref()
    }

    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect()
    }
}

/// Interim reference to a queued trigger that is not bound to an execution yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueHandle(String);

impl QueueHandle {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn locator(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRef {
    url: String,
    label: String,
}

impl ExecutionRef {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.url)
    }
}

/// Most recent execution of a job, as returned by a marker scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionDescriptor {
    pub execution: ExecutionRef,
    pub description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Unstable,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }

    pub fn failure_reason(self) -> Option<FailureReason> {
        match self {
            ExecutionState::Failed => Some(FailureReason::Failed),
            ExecutionState::Aborted => Some(FailureReason::Aborted),
            ExecutionState::Unstable => Some(FailureReason::Unstable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Aborted => "aborted",
            ExecutionState::Unstable => "unstable",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Failed,
    Aborted,
    Unstable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::Failed => "failed",
            FailureReason::Aborted => "aborted",
            FailureReason::Unstable => "unstable",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionStatus {
    pub state: ExecutionState,
    pub description: Option<String>,
    pub fetched_at_unix_millis: i64,
}

/// What the build server handed back for a trigger request.
#[derive(Clone, Debug, PartialEq)]
pub enum Issued {
    Queued(QueueHandle),
    Started(ExecutionRef),
    /// Accepted without any handle to follow.
    Accepted,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueueEntry {
    Pending { why: Option<String> },
    Bound(ExecutionRef),
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Trigger,
    Correlation,
    Wait,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => "connect",
            Stage::Trigger => "trigger",
            Stage::Correlation => "correlation",
            Stage::Wait => "wait",
        })
    }
}

#[derive(Debug)]
pub enum OutcomeKind {
    StartedNotWaited,
    Succeeded,
    Failed(FlowError),
}

/// Final result of one invocation.
#[derive(Debug)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub execution: Option<ExecutionRef>,
    pub description: Option<String>,
}

impl Outcome {
    pub fn failed(error: FlowError) -> Self {
        Self {
            kind: OutcomeKind::Failed(error),
            execution: None,
            description: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.kind, OutcomeKind::Failed(_))
    }

    pub fn error(&self) -> Option<&FlowError> {
        match &self.kind {
            OutcomeKind::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn timed_out_stage(&self) -> Option<Stage> {
        self.error().and_then(FlowError::timed_out_stage)
    }

    pub fn label(&self) -> &'static str {
        match &self.kind {
            OutcomeKind::StartedNotWaited => "started_not_waited",
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::Failed(err) => err.kind(),
        }
    }
}
