//! Scripted in-memory build server for exercising the polling loops.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{RemoteError, TransportError};
use crate::model::{
    ExecutionDescriptor, ExecutionRef, ExecutionState, ExecutionStatus, Issued, QueueEntry,
    QueueHandle, TriggerRequest,
};
use crate::remote::BuildServer;

pub(crate) fn status(state: ExecutionState, description: Option<&str>) -> ExecutionStatus {
    ExecutionStatus {
        state,
        description: description.map(str::to_string),
        fetched_at_unix_millis: 0,
    }
}

pub(crate) fn descriptor(url: &str, description: Option<&str>) -> ExecutionDescriptor {
    ExecutionDescriptor {
        execution: ExecutionRef::new(url, url),
        description: description.map(str::to_string),
    }
}

fn unreachable_error() -> RemoteError {
    RemoteError::Transport(TransportError::Connect("connection refused".into()))
}

/// Pops scripted items in order; the last one repeats forever.
fn next_scripted<T: Clone>(script: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

pub(crate) struct ScriptedServer {
    reachable: bool,
    status_reachable: bool,
    reject_trigger: bool,
    anti_forgery_ok: bool,
    issued: Issued,
    queue: Mutex<VecDeque<QueueEntry>>,
    latest: Mutex<VecDeque<Option<ExecutionDescriptor>>>,
    statuses: Mutex<VecDeque<ExecutionStatus>>,
    calls: Mutex<Vec<&'static str>>,
    requests: Mutex<Vec<TriggerRequest>>,
    queue_calls: Mutex<Vec<Instant>>,
    latest_calls: Mutex<Vec<Instant>>,
    status_calls: Mutex<Vec<Instant>>,
    status_targets: Mutex<Vec<String>>,
}

impl ScriptedServer {
    pub(crate) fn new() -> Self {
        Self {
            reachable: true,
            status_reachable: true,
            reject_trigger: false,
            anti_forgery_ok: true,
            issued: Issued::Accepted,
            queue: Mutex::new(VecDeque::new()),
            latest: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            queue_calls: Mutex::new(Vec::new()),
            latest_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            status_targets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_issued(mut self, issued: Issued) -> Self {
        self.issued = issued;
        self
    }

    pub(crate) fn with_queue(self, entries: Vec<QueueEntry>) -> Self {
        *self.queue.lock().unwrap() = entries.into();
        self
    }

    pub(crate) fn with_latest(self, latest: Vec<Option<ExecutionDescriptor>>) -> Self {
        *self.latest.lock().unwrap() = latest.into();
        self
    }

    pub(crate) fn with_statuses(self, statuses: Vec<ExecutionStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub(crate) fn unreachable_status(mut self) -> Self {
        self.status_reachable = false;
        self
    }

    pub(crate) fn rejecting_triggers(mut self) -> Self {
        self.reject_trigger = true;
        self
    }

    pub(crate) fn without_anti_forgery(mut self) -> Self {
        self.anti_forgery_ok = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn queue_calls(&self) -> Vec<Instant> {
        self.queue_calls.lock().unwrap().clone()
    }

    pub(crate) fn latest_calls(&self) -> Vec<Instant> {
        self.latest_calls.lock().unwrap().clone()
    }

    pub(crate) fn status_calls(&self) -> Vec<Instant> {
        self.status_calls.lock().unwrap().clone()
    }

    /// Locators of every status fetch, in order.
    pub(crate) fn status_targets(&self) -> Vec<String> {
        self.status_targets.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BuildServer for ScriptedServer {
    async fn version(&self) -> Result<String, RemoteError> {
        self.record("version");
        if self.reachable {
            Ok("2.440.3".into())
        } else {
            Err(unreachable_error())
        }
    }

    async fn prepare_mutations(&self) -> Result<(), RemoteError> {
        self.record("prepare_mutations");
        if self.anti_forgery_ok {
            Ok(())
        } else {
            Err(RemoteError::Transport(TransportError::Http {
                status: 404,
                body: "crumb issuer disabled".into(),
            }))
        }
    }

    async fn issue_job(&self, request: &TriggerRequest) -> Result<Issued, RemoteError> {
        self.record("issue_job");
        self.requests.lock().unwrap().push(request.clone());
        if self.reject_trigger {
            return Err(RemoteError::Transport(TransportError::Http {
                status: 400,
                body: "no such parameter".into(),
            }));
        }
        Ok(self.issued.clone())
    }

    async fn queue_entry(&self, _handle: &QueueHandle) -> Result<QueueEntry, RemoteError> {
        self.record("queue_entry");
        self.queue_calls.lock().unwrap().push(Instant::now());
        Ok(next_scripted(&self.queue).unwrap_or(QueueEntry::Pending { why: None }))
    }

    async fn latest_execution(
        &self,
        _job_name: &str,
        _sub_key: &str,
    ) -> Result<Option<ExecutionDescriptor>, RemoteError> {
        self.record("latest_execution");
        self.latest_calls.lock().unwrap().push(Instant::now());
        Ok(next_scripted(&self.latest).flatten())
    }

    async fn status(&self, execution: &ExecutionRef) -> Result<ExecutionStatus, RemoteError> {
        self.record("status");
        self.status_calls.lock().unwrap().push(Instant::now());
        self.status_targets
            .lock()
            .unwrap()
            .push(execution.url().to_string());
        if !self.status_reachable {
            return Err(unreachable_error());
        }
        Ok(next_scripted(&self.statuses)
            .unwrap_or_else(|| status(ExecutionState::Pending, None)))
    }

    fn job_page(&self, job_name: &str) -> String {
        format!("http://ci/job/{job_name}/")
    }
}
